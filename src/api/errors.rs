//! API error types and JSON error responses

use crate::records::RecordError;
use crate::security::csrf::CsrfRejection;
use crate::storage::StorageError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Everything a route can fail with
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Too many login attempts, try again later")]
    RateLimited,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("CSRF token missing")]
    CsrfTokenMissing,

    #[error("CSRF token mismatch")]
    CsrfTokenMismatch,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AuthenticationRequired => "AuthenticationRequired",
            ApiError::RateLimited => "RateLimited",
            ApiError::InvalidCredentials => "InvalidCredentials",
            ApiError::CsrfTokenMissing => "CsrfTokenMissing",
            ApiError::CsrfTokenMismatch => "CsrfTokenMismatch",
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::PayloadTooLarge => "PayloadTooLarge",
            ApiError::Internal(_) => "Internal",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::CsrfTokenMissing => StatusCode::FORBIDDEN,
            ApiError::CsrfTokenMismatch => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            // The detail stays in the log; clients get a generic message.
            error!("internal error: {}", detail);
        }
        let status = self.status_code();
        let body = json!({ "error": self.to_string(), "code": self.code() });
        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ApiError::NotFound(format!("Not found: {what}")),
            StorageError::InvalidName(name) => {
                ApiError::BadRequest(format!("Invalid file name: {name}"))
            }
            StorageError::UnsupportedType(name) => {
                ApiError::BadRequest(format!("Unsupported file type: {name}"))
            }
            StorageError::DiskFull => {
                ApiError::Internal("Insufficient storage space. The server's disk is full.".into())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<CsrfRejection> for ApiError {
    fn from(rejection: CsrfRejection) -> Self {
        match rejection {
            CsrfRejection::SessionTokenMissing | CsrfRejection::RequestTokenMissing => {
                ApiError::CsrfTokenMissing
            }
            CsrfRejection::Mismatch => ApiError::CsrfTokenMismatch,
        }
    }
}
