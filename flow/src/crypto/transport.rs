//! # AES-128-GCM Transport
//!
//! Opens inbound envelopes and seals outbound responses. The provider's
//! contract is unusual in two ways and both are load-bearing:
//!
//! - The IV is 16 bytes, not the canonical 12. The `aes-gcm` crate handles
//!   this by instantiating `AesGcm` with a `U16` nonce size.
//! - One symmetric key serves both directions of a request/response pair.
//!   The response IV is the **bytewise bit-complement** of the request IV
//!   (every bit flipped — not a byte reversal), which guarantees the (key,
//!   IV) pair is never reused across the two messages without any extra key
//!   material or server-side nonce state.
//!
//! The GCM auth tag rides as the final 16 bytes of the ciphertext in both
//! directions. A tag mismatch yields [`CryptoError::Authentication`] and no
//! plaintext, partial or otherwise — the `aead` API makes leaking partial
//! decryptions structurally impossible.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes128;
use aes_gcm::{AesGcm, Nonce};

use super::keys::{EndpointKey, SymmetricKey};
use super::CryptoError;
use crate::codec::EncryptedEnvelope;
use crate::config::{IV_LENGTH, TAG_LENGTH};

/// AES-128-GCM with the provider's 16-byte IV.
type FlowCipher = AesGcm<Aes128, U16>;

/// Derives the response IV: every bit of the request IV, flipped.
///
/// Self-inverse, so `flip_iv(&flip_iv(iv)) == *iv`.
pub fn flip_iv(iv: &[u8; IV_LENGTH]) -> [u8; IV_LENGTH] {
    iv.map(|b| !b)
}

/// Unwraps the envelope's symmetric key and decrypts the flow payload.
///
/// Returns the plaintext and the recovered key; the caller needs the key
/// (and the request IV it already holds) to seal the response. Both failure
/// modes — unwrap and payload authentication — surface as [`CryptoError`]
/// variants that the orchestrator collapses into one HTTP-level signal.
pub fn open(
    envelope: &EncryptedEnvelope,
    key: &EndpointKey,
) -> Result<(Vec<u8>, SymmetricKey), CryptoError> {
    let symmetric = key.unwrap_key(&envelope.wrapped_key)?;

    // Shorter than a bare tag cannot be a valid GCM message.
    if envelope.flow_data.len() < TAG_LENGTH {
        return Err(CryptoError::Authentication);
    }

    let plaintext = decrypt_with_iv(&envelope.flow_data, &symmetric, &envelope.iv)?;
    Ok((plaintext, symmetric))
}

/// Encrypts the response plaintext under the request's key and the flipped
/// request IV, returning `ciphertext || tag`.
///
/// Never regenerates or re-wraps the key — it is scoped to this one
/// exchange and dropped (zeroized) by the caller afterwards.
pub fn seal(
    plaintext: &[u8],
    key: &SymmetricKey,
    request_iv: &[u8; IV_LENGTH],
) -> Result<Vec<u8>, CryptoError> {
    encrypt_with_iv(plaintext, key, &flip_iv(request_iv)).map_err(|_| CryptoError::Encrypt)
}

/// Raw GCM encrypt under a caller-chosen IV.
///
/// This is the client's half of the exchange (the provider encrypts the
/// request under the request IV verbatim). The server itself only calls it
/// through [`seal`]; it is public so tests and tooling can play the client.
pub fn encrypt_with_iv(
    plaintext: &[u8],
    key: &SymmetricKey,
    iv: &[u8; IV_LENGTH],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        FlowCipher::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Encrypt)?;
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| CryptoError::Encrypt)
}

/// Raw GCM decrypt under a caller-chosen IV. Counterpart of
/// [`encrypt_with_iv`]; same audience.
pub fn decrypt_with_iv(
    ciphertext: &[u8],
    key: &SymmetricKey,
    iv: &[u8; IV_LENGTH],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        FlowCipher::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Authentication)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}
