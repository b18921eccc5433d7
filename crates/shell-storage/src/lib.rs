//! Persisted session storage for the app shell host.
//!
//! Two backends implement [`SecureStorage`]:
//! - [`FileStorage`]: a JSON map under the host base directory, replaced
//!   atomically on every write
//! - [`MemoryStorage`]: process-local, for offline runs and tests
//!
//! [`SessionVault`] layers the session keys on top of either.

mod file;
mod keys;
mod memory;
mod traits;
mod vault;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::SecureStorage;
pub use vault::{SessionMeta, SessionVault, StoredSession};

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Some keys of a multi-key clear could not be deleted.
    #[error("Partial clear: failed to delete {}", .failed.join(", "))]
    PartialClear { failed: Vec<String> },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
