//! Storage error types.
//!
//! Every error variant carries enough context to diagnose the problem
//! without a debugger.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to open or connect to the storage backend.
    #[error("failed to open storage backend '{backend}': {reason}")]
    Open { backend: String, reason: String },

    /// Failed to read a value from storage.
    #[error("failed to read {bucket}/{key}: {reason}")]
    Read {
        bucket: String,
        key: String,
        reason: String,
    },

    /// Failed to write a value to storage.
    #[error("failed to write {bucket}/{key}: {reason}")]
    Write {
        bucket: String,
        key: String,
        reason: String,
    },

    /// Failed to delete a key from storage.
    #[error("failed to delete {bucket}/{key}: {reason}")]
    Delete {
        bucket: String,
        key: String,
        reason: String,
    },

    /// Failed to evaluate a `find` query.
    #[error("failed to query bucket '{bucket}': {reason}")]
    Find { bucket: String, reason: String },

    /// A `put` with an expected etag did not match the stored version, or a
    /// create-only `put` found an existing record.
    #[error("version conflict on {bucket}/{key}")]
    Conflict { bucket: String, key: String },

    /// A sort or filter referenced an attribute the backend does not index.
    #[error("unknown query attribute '{attribute}'")]
    UnknownAttribute { attribute: String },
}
