//! # Envelope Codec
//!
//! Framing for the encrypted wire envelope. The provider POSTs a JSON body
//! with three base64 fields:
//!
//! ```json
//! {
//!   "encrypted_flow_data": "<base64>",
//!   "encrypted_aes_key":   "<base64>",
//!   "initial_vector":      "<base64 of exactly 16 bytes>"
//! }
//! ```
//!
//! and expects the response body to be the *bare* base64 text of the
//! ciphertext+tag — no JSON wrapper, content-type `text/plain`. Both shapes
//! are fixed by the provider's endpoint contract.
//!
//! Everything in this module runs before any cryptographic operation. A body
//! that fails here is a malformed request (HTTP 400), never a decrypt attempt.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use crate::config::IV_LENGTH;

/// Errors produced while parsing the wire envelope.
///
/// All of these mean the client (or something between us and the client)
/// sent garbage. None of them involve key material.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The body was not valid JSON or was missing a required field.
    #[error("invalid envelope JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A required field was present but empty.
    #[error("empty envelope field: {0}")]
    EmptyField(&'static str),

    /// A field did not decode as base64.
    #[error("invalid base64 in field {field}")]
    InvalidBase64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    /// The initialization vector decoded to the wrong number of bytes.
    #[error("initial_vector must be {IV_LENGTH} bytes, got {0}")]
    BadIvLength(usize),
}

/// The envelope exactly as it appears on the wire, base64 and all.
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    encrypted_flow_data: String,
    encrypted_aes_key: String,
    initial_vector: String,
}

/// A fully decoded inbound envelope, ready for the crypto transport.
#[derive(Debug)]
pub struct EncryptedEnvelope {
    /// AES-GCM ciphertext of the flow payload, auth tag appended.
    pub flow_data: Vec<u8>,
    /// RSA-OAEP ciphertext of the 128-bit symmetric key.
    pub wrapped_key: Vec<u8>,
    /// The request initialization vector. Exactly 16 bytes.
    pub iv: [u8; IV_LENGTH],
}

/// Parses an HTTP request body into an [`EncryptedEnvelope`].
///
/// Field presence, base64 validity, and IV length are all checked here,
/// up front. The three fields must be present and non-empty; absence is a
/// malformed request, never a decrypt attempt.
pub fn decode(body: &[u8]) -> Result<EncryptedEnvelope, EnvelopeError> {
    let wire: WireEnvelope = serde_json::from_slice(body)?;

    let flow_data = decode_field("encrypted_flow_data", &wire.encrypted_flow_data)?;
    let wrapped_key = decode_field("encrypted_aes_key", &wire.encrypted_aes_key)?;
    let iv_bytes = decode_field("initial_vector", &wire.initial_vector)?;

    let iv: [u8; IV_LENGTH] = iv_bytes
        .as_slice()
        .try_into()
        .map_err(|_| EnvelopeError::BadIvLength(iv_bytes.len()))?;

    Ok(EncryptedEnvelope {
        flow_data,
        wrapped_key,
        iv,
    })
}

/// Serializes an outbound ciphertext into the raw base64 response body.
pub fn encode(ciphertext: &[u8]) -> String {
    BASE64.encode(ciphertext)
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, EnvelopeError> {
    if value.is_empty() {
        return Err(EnvelopeError::EmptyField(field));
    }
    BASE64
        .decode(value)
        .map_err(|source| EnvelopeError::InvalidBase64 { field, source })
}
