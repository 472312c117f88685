//! Storage error types.

use thiserror::Error;

/// Chunk store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("incomplete upload: missing {missing} chunks")]
    IncompleteUpload { missing: u32 },

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Map an I/O error, turning `NotFound` into [`StorageError::NotFound`]
    /// labelled with `what`.
    pub(crate) fn from_io(e: std::io::Error, what: impl Into<String>) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(what.into())
        } else {
            Self::Io(e)
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
