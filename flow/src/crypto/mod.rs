//! # Cryptographic Transport
//!
//! The security boundary of the endpoint. Every inbound request carries a
//! fresh 128-bit AES key wrapped with our RSA public key; every response is
//! encrypted under that same key with a deterministically derived IV. Nothing
//! past this module ever sees ciphertext, and nothing before it ever sees
//! plaintext.
//!
//! - **keys** — RSA private key loading, generation, and key unwrap.
//! - **transport** — AES-128-GCM open/seal with the bit-flipped response IV.
//!
//! ## Error discipline
//!
//! A failed unwrap and a failed payload decrypt are deliberately collapsed
//! into one externally visible condition ("decryption failed"). The client's
//! remedy is identical for both — throw away its cached public key, fetch the
//! current one, retry — and distinguishing them on the wire would only tell
//! an attacker which layer rejected the forgery.

pub mod keys;
pub mod transport;

use thiserror::Error;

pub use keys::{EndpointKey, SymmetricKey};
pub use transport::{flip_iv, open, seal};

/// Errors that can occur in the cryptographic transport.
///
/// Display strings are intentionally vague. The difference between "wrong
/// key" and "tampered ciphertext" is none of the caller's business, and
/// certainly none of an attacker's.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// RSA-OAEP unwrap failed, or the recovered key was not 128 bits.
    #[error("key unwrap failed")]
    KeyUnwrap,

    /// AES-GCM authentication failed — tampered ciphertext or wrong key.
    #[error("payload authentication failed")]
    Authentication,

    /// Symmetric encryption of the response failed.
    #[error("response encryption failed")]
    Encrypt,
}
