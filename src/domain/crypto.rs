//! Key and ciphertext types for instruction content encryption.
//!
//! # Memory Security
//!
//! `ContentKey` implements `Zeroize` and `ZeroizeOnDrop` so key material is
//! erased when dropped, and its `Debug` output shows only the fingerprint.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Token format version prefix.
const TOKEN_VERSION: &str = "v1";

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Content key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Error type for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Content was encrypted with key {found}, active key is {expected}")]
    KeyMismatch { expected: String, found: String },

    #[error("Malformed ciphertext token: {0}")]
    MalformedToken(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),
}

/// Symmetric data key for instruction content.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    bytes: [u8; KEY_LEN],

    /// Key fingerprint for identification (NOT secret)
    #[zeroize(skip)]
    pub fingerprint: String,
}

impl ContentKey {
    /// Generate a fresh random key from OS entropy.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let key = Self::from_array(bytes);
        bytes.zeroize();
        key
    }

    /// Rebuild a key from unwrapped bytes.
    ///
    /// # Errors
    /// Returns `InvalidKeyFormat` if `bytes` is not exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyFormat(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_array(array))
    }

    fn from_array(bytes: [u8; KEY_LEN]) -> Self {
        let fingerprint = compute_fingerprint(&bytes);
        Self { bytes, fingerprint }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Ciphertext of one content field, with the nonce and key it was sealed under.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedContent {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub key_fingerprint: String,
}

impl EncryptedContent {
    /// Serialize as `v1.<fingerprint>.<base64(nonce || ciphertext)>`.
    #[must_use]
    pub fn to_token(&self) -> String {
        let mut payload = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        payload.extend_from_slice(&self.nonce);
        payload.extend_from_slice(&self.ciphertext);
        format!(
            "{TOKEN_VERSION}.{}.{}",
            self.key_fingerprint,
            BASE64.encode(payload)
        )
    }

    /// Parse a token produced by [`EncryptedContent::to_token`].
    ///
    /// # Errors
    /// Returns `MalformedToken` for unknown versions, bad base64 or short payloads.
    pub fn from_token(token: &str) -> Result<Self, CryptoError> {
        let mut parts = token.splitn(3, '.');
        let (Some(version), Some(fingerprint), Some(body)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::MalformedToken("expected three segments".to_string()));
        };
        if version != TOKEN_VERSION {
            return Err(CryptoError::MalformedToken(format!("unknown version {version:?}")));
        }
        let payload = BASE64
            .decode(body)
            .map_err(|e| CryptoError::MalformedToken(e.to_string()))?;
        // A GCM ciphertext always carries a 16-byte tag.
        if payload.len() < NONCE_LEN + 16 {
            return Err(CryptoError::MalformedToken("payload too short".to_string()));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&payload[..NONCE_LEN]);
        Ok(Self {
            nonce,
            ciphertext: payload[NONCE_LEN..].to_vec(),
            key_fingerprint: fingerprint.to_string(),
        })
    }

    /// Cheap check used to tell stored tokens from plaintext.
    #[must_use]
    pub fn looks_like_token(value: &str) -> bool {
        value.starts_with(TOKEN_VERSION) && value.matches('.').count() >= 2
    }
}

impl std::fmt::Debug for EncryptedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedContent")
            .field("size_bytes", &self.ciphertext.len())
            .field("key_fingerprint", &self.key_fingerprint)
            .finish()
    }
}

/// Compute a fingerprint for key identification using SHA-256.
///
/// The first 8 bytes of the digest, hex encoded. Never the raw key.
fn compute_fingerprint(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(bytes);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
