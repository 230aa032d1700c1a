//! Error types for reference operations.

use thiserror::Error;

/// Errors that can occur during reference operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// The reference was not found.
    #[error("reference not found: {name}")]
    NotFound { name: String },

    /// The reference name is invalid.
    #[error("invalid reference name: {name}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The reference is locked by another holder.
    #[error("reference is locked: {name}")]
    Locked { name: String },

    /// Unlock was requested on a reference that is not locked.
    #[error("reference is not locked: {name}")]
    NotLocked { name: String },

    /// A symbolic reference chain exceeded the resolution depth limit.
    #[error("symbolic reference loop: {name}")]
    SymrefLoop { name: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error during ref operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for ref operations.
pub type Result<T> = std::result::Result<T, RefError>;
