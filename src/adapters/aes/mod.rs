//! AES-256-GCM adapter: Implementation of ContentCipher.
//!
//! Each encryption draws a fresh 96-bit nonce from the OS RNG. Tokens carry
//! the key fingerprint so content sealed under another key is refused before
//! any decryption is attempted.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, Aes256Gcm, Nonce,
};

use crate::domain::{ContentKey, CryptoError, EncryptedContent};
use crate::ports::ContentCipher;

/// Content cipher bound to one data key.
pub struct AesContentCipher {
    key: ContentKey,
}

impl AesContentCipher {
    #[must_use]
    pub fn new(key: ContentKey) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(self.key.as_bytes())
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))
    }
}

impl std::fmt::Debug for AesContentCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesContentCipher")
            .field("key", &self.key)
            .finish()
    }
}

impl ContentCipher for AesContentCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()?
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut nonce_bytes = [0u8; crate::domain::crypto::NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce.as_slice());
        Ok(EncryptedContent {
            nonce: nonce_bytes,
            ciphertext,
            key_fingerprint: self.key.fingerprint.clone(),
        }
        .to_token())
    }

    fn decrypt(&self, token: &str) -> Result<String, CryptoError> {
        let content = EncryptedContent::from_token(token)?;
        if content.key_fingerprint != self.key.fingerprint {
            return Err(CryptoError::KeyMismatch {
                expected: self.key.fingerprint.clone(),
                found: content.key_fingerprint,
            });
        }

        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(&content.nonce), content.ciphertext.as_ref())
            .map_err(|_| CryptoError::Decryption("authentication failed".to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption(e.to_string()))
    }

    fn key_fingerprint(&self) -> &str {
        &self.key.fingerprint
    }
}
