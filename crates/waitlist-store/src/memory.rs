//! In-memory storage backend — for tests and local development.
//!
//! Wraps a `tokio::sync::RwLock<HashMap<...>>`. Etags are monotonic
//! per-key version counters, stringified. Not persisted across restarts
//! and not shared across processes — a single `MemoryBackend` instance
//! models exactly one control-plane process's view, which is enough to
//! test director/queue-manager logic but not cross-process coordination.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::sync::RwLock;

use crate::{Filter, FindQuery, Record, SortOrder, StorageBackend, StorageError};

struct Entry {
    value: serde_json::Value,
    version: u64,
}

/// An in-memory [`StorageBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    buckets: RwLock<HashMap<String, HashMap<String, Entry>>>,
    next_version: AtomicU64,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").finish_non_exhaustive()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> String {
        let v = self.next_version.fetch_add(1, AtomicOrdering::Relaxed);
        v.to_string()
    }
}

fn matches(filter: &Filter, value: &serde_json::Value) -> bool {
    match filter {
        Filter::All => true,
        Filter::Eq { attribute, value: expected } => value.get(attribute) == Some(expected),
        Filter::In { attribute, values } => value
            .get(attribute)
            .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
        Filter::And(a, b) => matches(a, value) && matches(b, value),
    }
}

fn compare_attr(a: &serde_json::Value, b: &serde_json::Value, attribute: &str) -> Ordering {
    let av = a.get(attribute);
    let bv = b.get(attribute);
    match (av, bv) {
        (Some(serde_json::Value::String(a)), Some(serde_json::Value::String(b))) => a.cmp(b),
        (Some(serde_json::Value::Number(a)), Some(serde_json::Value::Number(b))) => a
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&b.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Some(a), Some(b)) => format!("{a}").cmp(&format!("{b}")),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Record>, StorageError> {
        let buckets = self.buckets.read().await;
        Ok(buckets.get(bucket).and_then(|b| b.get(key)).map(|e| Record {
            value: e.value.clone(),
            etag: e.version.to_string(),
        }))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: serde_json::Value,
        expected_etag: Option<&str>,
    ) -> Result<String, StorageError> {
        let mut buckets = self.buckets.write().await;
        let table = buckets.entry(bucket.to_owned()).or_default();

        match (table.get(key), expected_etag) {
            (None, None) => {}
            (None, Some(_)) => {
                return Err(StorageError::Conflict {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                });
            }
            (Some(_), None) => {
                return Err(StorageError::Conflict {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                });
            }
            (Some(existing), Some(expected)) => {
                if existing.version.to_string() != expected {
                    return Err(StorageError::Conflict {
                        bucket: bucket.to_owned(),
                        key: key.to_owned(),
                    });
                }
            }
        }

        let etag = self.next_etag();
        let version: u64 = etag.parse().unwrap_or_default();
        table.insert(key.to_owned(), Entry { value, version });
        Ok(etag)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        if let Some(table) = buckets.get_mut(bucket) {
            table.remove(key);
        }
        Ok(())
    }

    async fn delete_matching(&self, bucket: &str, filter: &Filter) -> Result<u64, StorageError> {
        let mut buckets = self.buckets.write().await;
        let Some(table) = buckets.get_mut(bucket) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|_, entry| !matches(filter, &entry.value));
        Ok((before - table.len()) as u64)
    }

    async fn find(&self, bucket: &str, query: &FindQuery) -> Result<Vec<Record>, StorageError> {
        let buckets = self.buckets.read().await;
        let Some(table) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        let filter = query.filter.clone().unwrap_or(Filter::All);
        let mut matched: Vec<Record> = table
            .values()
            .filter(|e| matches(&filter, &e.value))
            .map(|e| Record {
                value: e.value.clone(),
                etag: e.version.to_string(),
            })
            .collect();

        matched.sort_by(|a, b| {
            for key in &query.sort {
                let ord = compare_attr(&a.value, &b.value, &key.attribute);
                let ord = match key.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let offset = query.offset.unwrap_or(0) as usize;
        let matched = if offset >= matched.len() {
            Vec::new()
        } else {
            matched.split_off(offset)
        };

        let matched = if let Some(limit) = query.limit {
            matched.into_iter().take(limit as usize).collect()
        } else {
            matched
        };

        Ok(matched)
    }
}
