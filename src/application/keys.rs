//! Content-key bootstrap: unwrap the stored data key or create one.

use super::authz::db;
use crate::adapters::{AesContentCipher, StorageError};
use crate::domain::kdf::{unwrap_key, wrap_key};
use crate::domain::ContentKey;
use crate::ports::Storage;
use crate::{ClearCareError, Result};

/// Unwrap the stored content key with `password`, creating one on first start.
///
/// An unreadable key is only replaced while no instruction exists yet;
/// otherwise the sealed content would be orphaned and the error is returned.
///
/// # Errors
/// Returns `Kdf` for a wrong password and `Storage` for an unreadable key
/// row once data exists, and `Storage` on database errors.
pub fn load_or_create_content_key<S>(storage: &S, password: &str) -> Result<ContentKey>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    let loaded: std::result::Result<_, StorageError> = storage.load_wrapped_key().map_err(Into::into);
    let failure: ClearCareError = match loaded {
        Ok(Some(wrapped)) => match unwrap_key(&wrapped, password) {
            Ok(key) => {
                tracing::info!(fingerprint = %key.fingerprint, "Unwrapped content key");
                return Ok(key);
            }
            Err(e) => e.into(),
        },
        Ok(None) => return create_key(storage, password),
        Err(StorageError::CorruptKey) => StorageError::CorruptKey.into(),
        Err(e) => return Err(e.into()),
    };

    let existing = storage.count_instructions().map_err(db)?;
    if existing > 0 {
        tracing::error!(existing, "Stored content key is unusable while instructions exist");
        return Err(failure);
    }
    tracing::warn!("Stored content key is unusable and no data depends on it, regenerating");
    create_key(storage, password)
}

/// Build the content cipher from the stored (or freshly created) key.
///
/// # Errors
/// Same as [`load_or_create_content_key`].
pub fn open_cipher<S>(storage: &S, password: &str) -> Result<AesContentCipher>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    load_or_create_content_key(storage, password).map(AesContentCipher::new)
}

fn create_key<S>(storage: &S, password: &str) -> Result<ContentKey>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    let key = ContentKey::generate();
    let wrapped = wrap_key(&key, password)?;
    // New key is written over the old row in one statement, never deleted first.
    storage.save_wrapped_key(&wrapped).map_err(db)?;
    tracing::info!(fingerprint = %key.fingerprint, "Generated content key");
    Ok(key)
}
