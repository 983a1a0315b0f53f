//! Key wrapping for the content data key.
//!
//! The data key that encrypts instruction content is stored wrapped:
//! - Argon2id derives a 256-bit wrapping key from the operator password
//! - AES-256-GCM seals the data key under it
//!
//! Salt and nonce are random per wrap, so re-wrapping the same key yields a
//! different blob.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{password_hash::SaltString, Algorithm, Argon2, Params, PasswordHasher, Version};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use super::crypto::NONCE_LEN;
use super::ContentKey;

/// Argon2id memory cost in KiB (46 MiB).
const ARGON2_MEMORY_KIB: u32 = 47104;

/// Errors during key wrapping/unwrapping.
#[derive(Debug, Error)]
pub enum KdfError {
    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Key wrapping failed: {0}")]
    Wrap(String),

    #[error("Key unwrapping failed: wrong password or corrupted data")]
    Unwrap,

    #[error("Invalid wrapped key format")]
    InvalidFormat,
}

/// Wrapped data key with everything needed to unwrap it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub ciphertext: Vec<u8>,
    /// Argon2id salt, base64 (PHC) form
    pub salt: String,
    pub nonce: [u8; NONCE_LEN],
    /// Fingerprint of the wrapped data key (not secret)
    pub key_fingerprint: String,
}

impl WrappedKey {
    /// Layout: `salt_len (u32 LE) || salt || nonce || ciphertext`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let salt = self.salt.as_bytes();
        let mut out = Vec::with_capacity(4 + salt.len() + NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&(salt.len() as u32).to_le_bytes());
        out.extend_from_slice(salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Inverse of [`WrappedKey::to_bytes`]; the fingerprint is stored alongside.
    ///
    /// # Errors
    /// Returns `InvalidFormat` if the blob is truncated or the salt is not UTF-8.
    pub fn from_bytes(bytes: &[u8], key_fingerprint: impl Into<String>) -> Result<Self, KdfError> {
        let len_bytes: [u8; 4] = bytes
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(KdfError::InvalidFormat)?;
        let salt_len = u32::from_le_bytes(len_bytes) as usize;
        let salt_end = 4usize.checked_add(salt_len).ok_or(KdfError::InvalidFormat)?;
        let nonce_end = salt_end + NONCE_LEN;
        if bytes.len() < nonce_end {
            return Err(KdfError::InvalidFormat);
        }

        let salt = std::str::from_utf8(&bytes[4..salt_end])
            .map_err(|_| KdfError::InvalidFormat)?
            .to_string();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[salt_end..nonce_end]);

        Ok(Self {
            ciphertext: bytes[nonce_end..].to_vec(),
            salt,
            nonce,
            key_fingerprint: key_fingerprint.into(),
        })
    }
}

/// Derive a 256-bit wrapping key from a password using Argon2id.
fn derive_wrapping_key(password: &str, salt: &SaltString) -> Result<Zeroizing<[u8; 32]>, KdfError> {
    let params = Params::new(ARGON2_MEMORY_KIB, 1, 1, Some(32))
        .map_err(|e| KdfError::Derivation(format!("Invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(password.as_bytes(), salt)
        .map_err(|e| KdfError::Derivation(e.to_string()))?;
    let output = hash
        .hash
        .ok_or_else(|| KdfError::Derivation("Hash output missing".to_string()))?;

    let bytes = output.as_bytes();
    if bytes.len() < 32 {
        return Err(KdfError::Derivation("Hash too short".to_string()));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&bytes[..32]);
    Ok(key)
}

/// Wrap a data key under a password.
///
/// # Errors
/// Returns error if derivation or encryption fails.
pub fn wrap_key(key: &ContentKey, password: &str) -> Result<WrappedKey, KdfError> {
    let salt = SaltString::generate(&mut OsRng);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let wrapping = derive_wrapping_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(wrapping.as_ref())
        .map_err(|e| KdfError::Wrap(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), key.as_bytes())
        .map_err(|e| KdfError::Wrap(e.to_string()))?;

    Ok(WrappedKey {
        ciphertext,
        salt: salt.to_string(),
        nonce,
        key_fingerprint: key.fingerprint.clone(),
    })
}

/// Unwrap a data key with a password.
///
/// # Errors
/// Returns `KdfError::Unwrap` if the password is wrong, the blob was tampered
/// with, or the recovered key does not match the stored fingerprint.
pub fn unwrap_key(wrapped: &WrappedKey, password: &str) -> Result<ContentKey, KdfError> {
    let salt = SaltString::from_b64(&wrapped.salt).map_err(|_| KdfError::InvalidFormat)?;
    let wrapping = derive_wrapping_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(wrapping.as_ref())
        .map_err(|e| KdfError::Derivation(e.to_string()))?;

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&wrapped.nonce), wrapped.ciphertext.as_ref())
            .map_err(|_| KdfError::Unwrap)?,
    );
    let key = ContentKey::from_bytes(&plaintext).map_err(|_| KdfError::Unwrap)?;
    if key.fingerprint != wrapped.key_fingerprint {
        return Err(KdfError::Unwrap);
    }
    Ok(key)
}
