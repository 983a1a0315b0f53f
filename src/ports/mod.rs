//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and external systems (database, cipher).

mod cipher;
mod storage;

pub use cipher::ContentCipher;
pub use storage::{Page, Storage};
