//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("incomplete upload: missing {missing} chunks")]
    IncompleteUpload { missing: u32 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] tessera_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] tessera_metadata::MetadataError),

    #[error("invalid input: {0}")]
    Core(#[from] tessera_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::IncompleteUpload { .. } => "incomplete_upload",
            Self::Internal(_) => "internal_error",
            Self::Storage(tessera_storage::StorageError::NotFound(_)) => "not_found",
            Self::Storage(tessera_storage::StorageError::IncompleteUpload { .. }) => {
                "incomplete_upload"
            }
            Self::Storage(_) => "storage_error",
            Self::Metadata(tessera_metadata::MetadataError::NotFound(_)) => "not_found",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "validation_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::IncompleteUpload { .. } => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                tessera_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                tessera_storage::StorageError::IncompleteUpload { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                tessera_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                tessera_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                tessera_metadata::MetadataError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::IncompleteUpload { missing: 2 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(tessera_storage::StorageError::NotFound("s".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(tessera_storage::StorageError::Config("c".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(tessera_metadata::MetadataError::Constraint("c".into())).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            ApiError::IncompleteUpload { missing: 1 }.code(),
            "incomplete_upload"
        );
        assert_eq!(ApiError::Forbidden("f".into()).code(), "forbidden");
        assert_eq!(
            ApiError::from(tessera_core::Error::InvalidSessionId("x".into())).code(),
            "validation_error"
        );
    }
}
