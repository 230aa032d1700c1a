use grove_types::ObjectId;

/// Errors from object store operations.
///
/// Absence ([`StoreError::NotFound`], [`StoreError::NoTreeEntry`]) is
/// deliberately distinct from I/O failure: the work-tree engine's state
/// machines branch on it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No object with this id exists in the store.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// A path component did not resolve within a tree.
    #[error("no tree entry found: {0}")]
    NoTreeEntry(String),

    /// The payload of an object cannot be decoded as its kind.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    /// Encoding or decoding an object envelope failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Refused to store an object hashing to the null id.
    #[error("cannot store object with null id")]
    NullObjectId,

    /// Failure in the backend itself.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
