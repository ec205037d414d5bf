//! # Key Management
//!
//! RSA endpoint key handling: loading the service's private key at startup,
//! generating fresh keypairs for provisioning, and unwrapping the per-request
//! symmetric key the provider sends us.
//!
//! ## Why RSA-OAEP?
//!
//! Not our choice — the provider's endpoint contract fixes RSA-OAEP with
//! SHA-256 (both as the hash and inside MGF1) for the key wrap. The public
//! half is uploaded to the provider out-of-band; the private half lives in a
//! PEM file readable only by this process.
//!
//! ## Security considerations
//!
//! - The unwrapped AES key is held in a [`SymmetricKey`] that zeroizes on
//!   drop; it never outlives the request that delivered it.
//! - Key bytes are never logged. If you add logging to this module, you
//!   will be asked to leave.
//! - A missing or unparseable private key is fatal at startup. Serving
//!   traffic without the ability to decrypt it helps no one.

use std::path::Path;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::CryptoError;
use crate::config::{AES_KEY_LENGTH, RSA_KEY_BITS};

/// Errors that can occur while loading or generating endpoint keys.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key file could not be read.
    #[error("failed to read private key file: {0}")]
    Io(#[from] std::io::Error),

    /// The PEM did not parse as PKCS#8 or PKCS#1 RSA private key material.
    #[error("private key is not valid PEM (PKCS#8 or PKCS#1)")]
    InvalidPem,

    /// Key generation failed. OsRng misbehaving — not a good day.
    #[error("key generation failed")]
    Generation,

    /// Serializing a key to PEM failed.
    #[error("key serialization failed")]
    Encoding,
}

/// The service's RSA private key.
///
/// Loaded exactly once at process start and shared read-only for the life
/// of the process. All it ever does is unwrap 16-byte AES keys.
pub struct EndpointKey {
    inner: RsaPrivateKey,
}

impl EndpointKey {
    /// Parses a private key from PEM text. Tries PKCS#8 first, then PKCS#1,
    /// which covers both `openssl genpkey` and `openssl genrsa` output.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let inner = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|_| KeyError::InvalidPem)?;
        Ok(Self { inner })
    }

    /// Reads and parses the private key file at `path`.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let pem = Zeroizing::new(std::fs::read_to_string(path)?);
        Self::from_pem(&pem)
    }

    /// Generates a fresh keypair for provisioning a new endpoint.
    pub fn generate() -> Result<Self, KeyError> {
        let inner = RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_BITS)
            .map_err(|_| KeyError::Generation)?;
        Ok(Self { inner })
    }

    /// The public half, to be uploaded to the provider.
    pub fn public_key(&self) -> RsaPublicKey {
        self.inner.to_public_key()
    }

    /// Serializes the private key as PKCS#8 PEM. The returned buffer
    /// zeroizes on drop — write it to disk and let it go.
    pub fn private_key_pem(&self) -> Result<Zeroizing<String>, KeyError> {
        self.inner
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|_| KeyError::Encoding)
    }

    /// Serializes the public key as SPKI PEM.
    pub fn public_key_pem(&self) -> Result<String, KeyError> {
        self.public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| KeyError::Encoding)
    }

    /// Unwraps the symmetric key from its RSA-OAEP ciphertext.
    ///
    /// Fails with [`CryptoError::KeyUnwrap`] if the OAEP decrypt fails
    /// (wrong key loaded, corrupted ciphertext) or if the recovered key is
    /// not exactly 16 bytes. The intermediate buffer is scrubbed either way.
    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<SymmetricKey, CryptoError> {
        let mut recovered = self
            .inner
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| CryptoError::KeyUnwrap)?;

        let result = <[u8; AES_KEY_LENGTH]>::try_from(recovered.as_slice())
            .map(SymmetricKey)
            .map_err(|_| CryptoError::KeyUnwrap);
        recovered.zeroize();
        result
    }
}

/// The 128-bit AES key recovered from one request.
///
/// Scoped to a single request/response exchange: unwrapped from the
/// envelope, used to open the request and seal the response, then dropped —
/// at which point the bytes are zeroized. Never persisted, never re-wrapped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey(pub(crate) [u8; AES_KEY_LENGTH]);

impl SymmetricKey {
    /// Wraps raw key bytes. Exists for tests and local tooling; production
    /// keys only ever come out of [`EndpointKey::unwrap_key`].
    pub fn new(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.0
    }
}

/// Wraps an AES key under an RSA public key, exactly as the provider does.
///
/// The server never calls this in production — it exists so integration
/// tests and local tooling can play the client's half of the exchange.
pub fn wrap_key(public: &RsaPublicKey, key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    public
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|_| CryptoError::KeyUnwrap)
}
