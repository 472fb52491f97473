//! HTTP error types for the waitlist server.
//!
//! Maps domain errors from `waitlist-core` into HTTP responses. Every
//! error variant produces a JSON body with a machine-readable `error`
//! field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use waitlist_core::error::WaitlistError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Validation or parameter-bounds failure.
    InvalidArgument(String),
    /// Requested ticket not found.
    NotFound(String),
    /// Optimistic-concurrency retries were exhausted.
    Conflict(String),
    /// A destructive operation was attempted without its required flag.
    PreconditionFailed(String),
    /// The underlying store is unreachable or returned an error.
    StoreUnavailable(String),
    /// Anything else.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, "invalid_argument", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::PreconditionFailed(msg) => {
                (StatusCode::PRECONDITION_FAILED, "precondition_failed", msg)
            }
            Self::StoreUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<WaitlistError> for AppError {
    fn from(err: WaitlistError) -> Self {
        match err {
            WaitlistError::InvalidArgument { .. } => Self::InvalidArgument(err.to_string()),
            WaitlistError::NotFound { .. } => Self::NotFound(err.to_string()),
            WaitlistError::Conflict { .. } => Self::Conflict(err.to_string()),
            WaitlistError::PreconditionFailed { .. } => Self::PreconditionFailed(err.to_string()),
            WaitlistError::StoreUnavailable(_) => Self::StoreUnavailable(err.to_string()),
            WaitlistError::Internal { .. } => Self::Internal(err.to_string()),
        }
    }
}
