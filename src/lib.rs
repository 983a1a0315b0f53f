//! # ClearCare
//!
//! Post-visit care instructions and compliance tracking.
//!
//! Providers issue care instructions to their assigned patients, patients
//! acknowledge them and record adherence, and administrators manage users
//! and read the audit trail.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core business types and rules (roles, instructions, compliance)
//! - `ports`: Trait definitions for storage and content encryption
//! - `adapters`: Concrete implementations (SQLite, AES-GCM, log redaction)
//! - `application`: Role-scoped services orchestrating domain and ports
//! - `config`: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use domain::{Caller, Role};

/// Result type for ClearCare operations
pub type Result<T> = std::result::Result<T, ClearCareError>;

/// Main error type for ClearCare
#[derive(Debug, thiserror::Error)]
pub enum ClearCareError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(#[from] domain::CryptoError),

    #[error("Key management failed: {0}")]
    Kdf(#[from] domain::kdf::KdfError),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClearCareError {
    /// HTTP status an API layer should answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Forbidden(_) => 403,
            Self::BadRequest(_) | Self::Validation(_) => 400,
            Self::Storage(adapters::StorageError::Conflict(_)) => 400,
            _ => 500,
        }
    }

    pub(crate) fn not_found(what: &str, id: &str) -> Self {
        Self::NotFound(format!("{what} {id} not found"))
    }

    pub(crate) fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub(crate) fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ClearCareError::not_found("Instruction", "x").status_code(), 404);
        assert_eq!(ClearCareError::forbidden("no").status_code(), 403);
        assert_eq!(ClearCareError::Validation(vec!["a".into()]).status_code(), 400);
        assert_eq!(
            ClearCareError::Storage(adapters::StorageError::Conflict("dup".into())).status_code(),
            400
        );
        assert_eq!(
            ClearCareError::Storage(adapters::StorageError::LockPoisoned).status_code(),
            500
        );
    }

    #[test]
    fn validation_message_joins_errors() {
        let err = ClearCareError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Validation failed: a; b");
    }
}
