//! Cipher port: Trait for instruction content encryption.

use crate::domain::CryptoError;

/// Symmetric encryption of free-text content before it reaches storage.
///
/// Implementations produce self-describing string tokens so the ciphertext
/// fits in an ordinary text column.
pub trait ContentCipher: Send + Sync {
    /// Encrypt `plaintext` under the active key with a fresh nonce.
    ///
    /// # Errors
    /// Returns error if encryption fails.
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;

    /// Decrypt a token produced by [`ContentCipher::encrypt`].
    ///
    /// # Errors
    /// Returns error for a malformed token, a token sealed under another key,
    /// or tampered ciphertext.
    fn decrypt(&self, token: &str) -> Result<String, CryptoError>;

    /// Fingerprint of the active key.
    fn key_fingerprint(&self) -> &str;
}
