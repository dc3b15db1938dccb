//! Authenticated encryption for clinical artifacts.
//!
//! Artifacts are sealed with AES-256-GCM under a single process-wide master key. A sealed blob
//! is laid out as:
//!
//! ```text
//! nonce (12 bytes) || tag (16 bytes) || ciphertext (N bytes)
//! ```
//!
//! There is no other envelope metadata. Decryption is all-or-nothing: a truncated blob, a
//! wrong key, or a single altered bit anywhere in the blob yields [`CryptoError::Integrity`]
//! and never partial plaintext.

use aes_gcm::aead::{AeadInPlace, KeyInit, Nonce, Tag};
use aes_gcm::{Aes256Gcm, Key};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use thiserror::Error;

/// Master key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;
/// Smallest possible sealed blob: nonce and tag around an empty ciphertext.
pub const SEALED_HEADER_LEN: usize = NONCE_LEN + TAG_LEN;

/// Why an integrity check failed. Kept for logs; callers should not echo it to end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityFailure {
    /// Blob shorter than nonce + tag.
    Truncated { len: usize },
    /// Authentication tag did not verify.
    TagMismatch,
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(
                f,
                "sealed blob is {} bytes, minimum is {}",
                len, SEALED_HEADER_LEN
            ),
            Self::TagMismatch => write!(f, "authentication tag mismatch"),
        }
    }
}

/// Errors that can occur while loading keys or sealing/unsealing data.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    #[error("integrity check failed: {0}")]
    Integrity(IntegrityFailure),

    #[error("encryption failed")]
    Encryption,
}

/// The 256-bit symmetric master key.
///
/// Never printed: `Debug` is redacted and there is no `Display`.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Decodes a hex-encoded key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the input is not hex or does not decode to exactly
    /// 32 bytes.
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(input.trim())
            .map_err(|_| CryptoError::InvalidKey("master key must be hex-encoded".into()))?;
        let len = bytes.len();
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "master key must decode to {} bytes, got {}",
                KEY_LEN, len
            ))
        })?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh key from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Hex encoding of the key, for provisioning tools only.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// An encrypted artifact in its at-rest layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedBlob(Vec<u8>);

impl SealedBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The nonce prefix, if the blob is long enough to carry one.
    pub fn nonce(&self) -> Option<&[u8]> {
        self.0.get(..NONCE_LEN)
    }
}

impl From<Vec<u8>> for SealedBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Seals and unseals byte payloads under one master key.
#[derive(Clone)]
pub struct CryptoCodec {
    cipher: Aes256Gcm,
}

impl fmt::Debug for CryptoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CryptoCodec { .. }")
    }
}

impl CryptoCodec {
    pub fn new(key: &MasterKey) -> Self {
        let key: &Key<Aes256Gcm> = (&key.0).into();
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the AEAD refuses the input (payloads beyond the
    /// GCM length limit).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedBlob, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::<Aes256Gcm>::from_slice(&nonce_bytes);

        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, b"", &mut buffer)
            .map_err(|_| CryptoError::Encryption)?;

        let mut sealed = Vec::with_capacity(SEALED_HEADER_LEN + buffer.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(tag.as_slice());
        sealed.extend_from_slice(&buffer);
        Ok(SealedBlob(sealed))
    }

    /// Verifies and decrypts a sealed blob.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Integrity`] if the blob is shorter than 28 bytes or the
    /// authentication tag does not verify.
    pub fn decrypt(&self, blob: &SealedBlob) -> Result<Vec<u8>, CryptoError> {
        let bytes = blob.as_bytes();
        if bytes.len() < SEALED_HEADER_LEN {
            return Err(CryptoError::Integrity(IntegrityFailure::Truncated {
                len: bytes.len(),
            }));
        }

        let nonce = Nonce::<Aes256Gcm>::from_slice(&bytes[..NONCE_LEN]);
        let tag = Tag::<Aes256Gcm>::from_slice(&bytes[NONCE_LEN..SEALED_HEADER_LEN]);
        let mut buffer = bytes[SEALED_HEADER_LEN..].to_vec();

        self.cipher
            .decrypt_in_place_detached(nonce, b"", &mut buffer, tag)
            .map_err(|_| CryptoError::Integrity(IntegrityFailure::TagMismatch))?;

        Ok(buffer)
    }
}
