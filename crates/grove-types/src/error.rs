//! Error types for grove foundation types.

use thiserror::Error;

/// Errors produced while parsing or constructing foundation types.
#[derive(Debug, Error)]
pub enum TypeError {
    /// A hex string could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// A decoded value had the wrong length.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// An identity string was malformed.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}
