//! Transactional key-value storage abstraction for the waitlist subsystem.
//!
//! This crate defines the [`StorageBackend`] trait — an abstract,
//! etag-guarded, queryable key-value store. It knows nothing about
//! tickets, queues, or the director; those live in `waitlist-core` and
//! are built entirely on top of this trait.
//!
//! Two implementations are provided:
//!
//! - [`MemoryBackend`] — in-process, for tests and local development
//! - [`PostgresBackend`] — production default, backed by `PostgreSQL` (feature `postgres-backend`)

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresBackend;

/// A record as stored: an opaque JSON value plus the etag of its current
/// version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The stored value.
    pub value: serde_json::Value,
    /// Opaque version token. Changes on every successful write.
    pub etag: String,
}

/// Sort order for a [`FindQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A single sort key: an attribute name (a top-level field of the stored
/// JSON value) plus direction. [`FindQuery::sort`] may carry more than one
/// — later keys break ties among earlier ones.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub attribute: String,
    pub order: SortOrder,
}

impl SortKey {
    #[must_use]
    pub fn new(attribute: impl Into<String>, order: SortOrder) -> Self {
        Self {
            attribute: attribute.into(),
            order,
        }
    }
}

/// A filter over a bucket's records, evaluated against top-level JSON
/// attributes.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Match every record in the bucket.
    All,
    /// `attribute == value`.
    Eq {
        attribute: String,
        value: serde_json::Value,
    },
    /// `attribute IN values`.
    In {
        attribute: String,
        values: Vec<serde_json::Value>,
    },
    /// Both sub-filters must match.
    And(Box<Filter>, Box<Filter>),
}

/// A query against [`StorageBackend::find`].
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filter: Option<Filter>,
    pub sort: Vec<SortKey>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl FindQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A pluggable, etag-guarded, transactional key-value storage backend.
///
/// Buckets partition the keyspace (the waitlist uses a single `"tickets"`
/// bucket, keyed by ticket uuid). Values are arbitrary JSON documents —
/// the caller (`waitlist-core`) decides their shape; the store only needs
/// to evaluate filters and sorts over their top-level attributes.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a record by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Record>, StorageError>;

    /// Store a value, guarded by optimistic concurrency.
    ///
    /// - `expected_etag = None` means "create" — fails with
    ///   [`StorageError::Conflict`] if the key already exists.
    /// - `expected_etag = Some(tag)` means "replace only if the current
    ///   etag is `tag`" — fails with [`StorageError::Conflict`] if the key
    ///   is missing or its etag has changed.
    ///
    /// Returns the new etag on success.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] on a version mismatch, or
    /// [`StorageError::Write`] if the underlying backend fails.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: serde_json::Value,
        expected_etag: Option<&str>,
    ) -> Result<String, StorageError>;

    /// Delete a key. Idempotent — deleting a non-existent key is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Delete every record in a bucket matching a filter. Returns the
    /// number of records removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete_matching(&self, bucket: &str, filter: &Filter) -> Result<u64, StorageError>;

    /// Find records in a bucket matching a query.
    ///
    /// Buffers matching records into a `Vec` rather than a lazy stream —
    /// acceptable given the bounded, per-server/per-scope cardinality the
    /// waitlist deals in.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Find`] if the underlying backend fails.
    async fn find(&self, bucket: &str, query: &FindQuery) -> Result<Vec<Record>, StorageError>;
}
