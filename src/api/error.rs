//! API error types.
//!
//! Errors that can be decided before a reply stream starts (unknown archive,
//! handler failures) are mapped to HTTP status codes here. Errors raised by
//! a producer after streaming has begun travel inside the reply channel
//! instead and appear as text in the body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::archive::ArchiveError;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Archive layer error
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Archive(err) => match err {
                ArchiveError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                ArchiveError::BadRequest | ArchiveError::BadDate | ArchiveError::TooLarge => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST")
                }
                ArchiveError::Empty | ArchiveError::OutOfRange => {
                    (StatusCode::NOT_FOUND, "OUT_OF_RANGE")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ARCHIVE_ERROR"),
            },
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        tracing::error!(
            error_code = %code,
            error_message = %self,
            "API error occurred"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let resp = ApiError::NotFound("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ApiError::Archive(ArchiveError::BadDate).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::Internal("boom".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
