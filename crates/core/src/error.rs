//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("invalid principal: {0}")]
    InvalidPrincipal(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
