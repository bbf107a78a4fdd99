use std::path::PathBuf;

use acq_types::Coords;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An image already occupies this coordinate.
    #[error("coordinate already occupied: {0}")]
    Occupied(Coords),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk data is malformed or fails its integrity check.
    #[error("corrupt data in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A lock guarding backend state was poisoned by a panicking writer.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// The backend has been finalized and accepts no further writes.
    #[error("storage has been finalized")]
    Finalized,
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
