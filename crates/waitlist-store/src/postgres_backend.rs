//! `PostgreSQL` storage backend — the production default.
//!
//! Stores every bucket/key pair as a row in a single generic
//! `waitlist_records` table (`bucket`, `key`, `value jsonb`, `etag
//! bigint`). Optimistic concurrency is implemented with a `WHERE etag =
//! $n` guard on updates, checking `rows_affected() == 0` to detect a
//! missing or already-changed row.
//!
//! Sorting is restricted to a fixed whitelist of ticket attributes
//! (`server_uuid`, `scope`, `id`, `status`, `created_at`, `uuid`) so that
//! attribute names can be interpolated into `ORDER BY` safely — bind
//! parameters cannot parameterize column names.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::{Filter, FindQuery, Record, SortOrder, StorageBackend, StorageError};

/// A storage backend backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend").finish_non_exhaustive()
    }
}

impl PostgresBackend {
    /// Connect to `PostgreSQL` and ensure the backing table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the connection or migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Open {
                backend: "postgres".to_owned(),
                reason: e.to_string(),
            })?;

        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS waitlist_records (
                bucket TEXT NOT NULL,
                key TEXT NOT NULL,
                value JSONB NOT NULL,
                etag BIGINT NOT NULL,
                PRIMARY KEY (bucket, key)
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Open {
            backend: "postgres".to_owned(),
            reason: e.to_string(),
        })?;

        Ok(Self { pool })
    }

    fn sort_column(attribute: &str) -> Result<&'static str, StorageError> {
        match attribute {
            "server_uuid" => Ok("value->>'server_uuid'"),
            "scope" => Ok("value->>'scope'"),
            "id" => Ok("value->>'id'"),
            "status" => Ok("value->>'status'"),
            "created_at" => Ok("value->>'created_at'"),
            "updated_at" => Ok("value->>'updated_at'"),
            "uuid" => Ok("value->>'uuid'"),
            other => Err(StorageError::UnknownAttribute {
                attribute: other.to_owned(),
            }),
        }
    }

    /// Build a `WHERE` fragment and bind list for a [`Filter`]. Returns the
    /// SQL fragment (starting from `AND ...`) plus the bind values in order.
    ///
    /// `start` is the number of placeholders already claimed by the query
    /// before any filter bind is appended (`bucket` always occupies `$1`),
    /// so a placeholder's number is `start + binds.len()` after its value is
    /// pushed — `binds` accumulates across the whole filter tree, including
    /// nested `And` calls, so this stays correct however deep the tree is.
    fn filter_sql(filter: &Filter, start: usize, binds: &mut Vec<serde_json::Value>) -> Result<String, StorageError> {
        match filter {
            Filter::All => Ok(String::new()),
            Filter::Eq { attribute, value } => {
                binds.push(value.clone());
                Ok(format!(
                    " AND (value->>'{attribute}') = ${}::text",
                    start + binds.len()
                ))
            }
            Filter::In { attribute, values } => {
                if values.is_empty() {
                    return Ok(" AND false".to_owned());
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for v in values {
                    binds.push(v.clone());
                    placeholders.push(format!("${}::text", start + binds.len()));
                }
                Ok(format!(
                    " AND (value->>'{attribute}') IN ({})",
                    placeholders.join(", ")
                ))
            }
            Filter::And(a, b) => {
                let left = Self::filter_sql(a, start, binds)?;
                let right = Self::filter_sql(b, start, binds)?;
                Ok(format!("{left}{right}"))
            }
        }
    }
}

fn json_text_bind(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl StorageBackend for PostgresBackend {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Record>, StorageError> {
        let row = sqlx::query("SELECT value, etag FROM waitlist_records WHERE bucket = $1 AND key = $2")
            .bind(bucket)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Read {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(row.map(|r| Record {
            value: r.get::<serde_json::Value, _>("value"),
            etag: r.get::<i64, _>("etag").to_string(),
        }))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: serde_json::Value,
        expected_etag: Option<&str>,
    ) -> Result<String, StorageError> {
        let conflict = || StorageError::Conflict {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        };

        match expected_etag {
            None => {
                let result = sqlx::query(
                    r"INSERT INTO waitlist_records (bucket, key, value, etag)
                      VALUES ($1, $2, $3, 0)
                      ON CONFLICT (bucket, key) DO NOTHING",
                )
                .bind(bucket)
                .bind(key)
                .bind(&value)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Write {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                    reason: e.to_string(),
                })?;

                if result.rows_affected() == 0 {
                    return Err(conflict());
                }
                Ok("0".to_owned())
            }
            Some(expected) => {
                let expected: i64 = expected.parse().map_err(|_| conflict())?;
                let result = sqlx::query(
                    r"UPDATE waitlist_records
                      SET value = $1, etag = etag + 1
                      WHERE bucket = $2 AND key = $3 AND etag = $4",
                )
                .bind(&value)
                .bind(bucket)
                .bind(key)
                .bind(expected)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Write {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                    reason: e.to_string(),
                })?;

                if result.rows_affected() == 0 {
                    return Err(conflict());
                }
                Ok((expected + 1).to_string())
            }
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM waitlist_records WHERE bucket = $1 AND key = $2")
            .bind(bucket)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Delete {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn delete_matching(&self, bucket: &str, filter: &Filter) -> Result<u64, StorageError> {
        let mut binds = Vec::new();
        let where_clause = Self::filter_sql(filter, 1, &mut binds).map_err(|e| StorageError::Delete {
            bucket: bucket.to_owned(),
            key: String::new(),
            reason: e.to_string(),
        })?;

        let mut query = sqlx::query(&format!(
            "DELETE FROM waitlist_records WHERE bucket = $1{where_clause}"
        ))
        .bind(bucket);
        for b in &binds {
            query = query.bind(json_text_bind(b));
        }

        let result = query.execute(&self.pool).await.map_err(|e| StorageError::Delete {
            bucket: bucket.to_owned(),
            key: String::new(),
            reason: e.to_string(),
        })?;

        Ok(result.rows_affected())
    }

    async fn find(&self, bucket: &str, query: &FindQuery) -> Result<Vec<Record>, StorageError> {
        let mut binds = Vec::new();
        let where_clause = match &query.filter {
            Some(f) => Self::filter_sql(f, 1, &mut binds)?,
            None => String::new(),
        };

        let mut order_by = String::new();
        if !query.sort.is_empty() {
            let mut parts = Vec::with_capacity(query.sort.len());
            for key in &query.sort {
                // Propagate `UnknownAttribute` as-is rather than folding it
                // into `Find` — it's a bad request parameter, not a query
                // execution failure, and callers distinguish the two.
                let col = Self::sort_column(&key.attribute)?;
                let dir = match key.order {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                parts.push(format!("{col} {dir}"));
            }
            order_by = format!(" ORDER BY {}", parts.join(", "));
        }

        let mut sql = format!("SELECT value, etag FROM waitlist_records WHERE bucket = $1{where_clause}{order_by}");
        // $1 is `bucket`, $2..=$(1 + binds.len()) are the filter binds — the
        // next free placeholder starts one past that.
        let mut next_bind = 1 + binds.len() + 1;
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT ${next_bind}"));
            next_bind += 1;
            let _ = limit;
        }
        if query.offset.is_some() {
            sql.push_str(&format!(" OFFSET ${next_bind}"));
        }

        let mut q = sqlx::query(&sql).bind(bucket);
        for b in &binds {
            q = q.bind(json_text_bind(b));
        }
        if let Some(limit) = query.limit {
            q = q.bind(i64::from(limit));
        }
        if let Some(offset) = query.offset {
            q = q.bind(i64::from(offset));
        }

        let rows = q.fetch_all(&self.pool).await.map_err(|e| StorageError::Find {
            bucket: bucket.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(rows
            .into_iter()
            .map(|r| Record {
                value: r.get::<serde_json::Value, _>("value"),
                etag: r.get::<i64, _>("etag").to_string(),
            })
            .collect())
    }
}
