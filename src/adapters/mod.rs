//! Adapters layer: Concrete implementations of ports.
//!
//! - `sqlite`: SQLite persistence
//! - `aes`: AES-256-GCM content encryption
//! - `sanitize`: PII filtering for logs

pub mod aes;
pub mod sanitize;
pub mod sqlite;

pub use aes::AesContentCipher;
pub use sqlite::{SqliteStorage, StorageError};
