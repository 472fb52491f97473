//! Error types for `waitlist-core`.
//!
//! Each variant carries enough context to diagnose the problem without a
//! debugger, and maps 1:1 onto the error kinds the HTTP layer translates
//! into status codes.

use waitlist_store::StorageError;

/// Errors from ticket and queue operations.
#[derive(Debug, thiserror::Error)]
pub enum WaitlistError {
    /// A parameter failed validation (malformed `expires_at`, empty
    /// `scope`/`id`, out-of-range `limit`).
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The referenced ticket does not exist.
    #[error("ticket not found: {uuid}")]
    NotFound { uuid: String },

    /// Optimistic-concurrency retries were exhausted.
    #[error("conflict updating ticket {uuid} after {attempts} attempts")]
    Conflict { uuid: String, attempts: u32 },

    /// A destructive operation was attempted without its required flag.
    #[error("precondition failed: {reason}")]
    PreconditionFailed { reason: String },

    /// The underlying store returned an error.
    #[error("store unavailable: {0}")]
    StoreUnavailable(StorageError),

    /// Anything else — a bug or an invariant violation.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

/// [`StorageError::UnknownAttribute`] means a caller asked to sort or filter
/// on a column the backend doesn't index — a bad request parameter, not a
/// store outage — so it maps to `InvalidArgument` rather than the blanket
/// `StoreUnavailable` every other storage error becomes.
impl From<StorageError> for WaitlistError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnknownAttribute { attribute } => Self::InvalidArgument {
                reason: format!("unknown list attribute '{attribute}'"),
            },
            other => Self::StoreUnavailable(other),
        }
    }
}
