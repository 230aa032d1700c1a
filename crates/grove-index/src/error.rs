//! Error types for file index operations.

use thiserror::Error;

/// Errors that can occur during index operations and walks.
#[derive(Debug, Error)]
pub enum IndexError {
    /// An entry with this path already exists.
    #[error("duplicate index entry: {0}")]
    DuplicateEntry(String),

    /// No entry with this path exists.
    #[error("index entry not found: {0}")]
    NotFound(String),

    /// The on-disk index data is malformed.
    #[error("corrupt file index: {0}")]
    Corrupt(String),

    /// The on-disk index was written by a different format version.
    #[error("file index format version {actual}, expected {expected}")]
    WrongVersion { expected: u32, actual: u32 },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A walk was cancelled by the caller's cancellation predicate.
    #[error("operation cancelled")]
    Cancelled,

    /// Object store failure while reading trees during a walk.
    #[error(transparent)]
    Store(#[from] grove_store::StoreError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
