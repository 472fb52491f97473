//! The queue manager: create, release, delete, and list tickets.
//!
//! Holds no state of its own beyond the store handle and the director wake
//! signal — every invariant is enforced through etag-guarded writes against
//! `waitlist-store`, the same optimistic-concurrency discipline the barrier
//! layer uses for its root-key writes.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;
use waitlist_store::{Filter, FindQuery, SortKey, SortOrder, StorageBackend, StorageError};

use crate::error::WaitlistError;
use crate::ticket::{CreateParams, Ticket, TicketStatus, BUCKET};

/// Release retries are bounded — beyond this many conflicting writes the
/// caller gets `conflict` and may retry at the HTTP layer.
const RELEASE_MAX_RETRIES: u32 = 5;

/// Default and maximum page size for [`QueueManager::list`].
pub const LIST_MAX_LIMIT: u32 = 1000;

/// The result of a successful [`QueueManager::create`]: the new ticket's
/// uuid plus the full queue it joined, ordered `(created_at, uuid)`.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub uuid: Uuid,
    pub queue: Vec<Uuid>,
}

/// Parameters for [`QueueManager::list`].
#[derive(Debug, Clone)]
pub struct ListParams {
    pub server_uuid: String,
    pub limit: u32,
    pub offset: u32,
    pub attribute: String,
    pub order: SortOrder,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            server_uuid: String::new(),
            limit: LIST_MAX_LIMIT,
            offset: 0,
            attribute: "created_at".to_owned(),
            order: SortOrder::Asc,
        }
    }
}

/// Creates, releases, deletes, and lists tickets under optimistic
/// concurrency.
pub struct QueueManager {
    store: Arc<dyn StorageBackend>,
    wake: Arc<tokio::sync::Notify>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager").finish_non_exhaustive()
    }
}

impl QueueManager {
    /// Build a queue manager over `store`. `wake` is shared with the
    /// [`crate::director::Director`] so that [`release`](Self::release) can
    /// prompt an immediate re-sweep.
    #[must_use]
    pub fn new(store: Arc<dyn StorageBackend>, wake: Arc<tokio::sync::Notify>) -> Self {
        Self { store, wake }
    }

    /// Create a ticket and return it plus its queue position.
    ///
    /// # Errors
    ///
    /// Returns [`WaitlistError::InvalidArgument`] if `params` fails
    /// validation, or [`WaitlistError::StoreUnavailable`] on transport
    /// failure.
    pub async fn create(&self, params: CreateParams) -> Result<CreateOutcome, WaitlistError> {
        let ticket = params.into_ticket()?;
        let value = ticket.to_value()?;

        self.store
            .put(BUCKET, &ticket.uuid.to_string(), value, None)
            .await?;

        info!(
            uuid = %ticket.uuid,
            server_uuid = %ticket.server_uuid,
            scope = %ticket.scope,
            id = %ticket.id,
            "ticket created"
        );

        let queue = self.queue_for(&ticket.server_uuid, &ticket.scope, &ticket.id).await?;
        Ok(CreateOutcome {
            uuid: ticket.uuid,
            queue: queue.iter().map(|t| t.uuid).collect(),
        })
    }

    /// Release a ticket: transitions `active`/`queued` to `finished`.
    ///
    /// No-op (success) if the ticket is already terminal. Retries up to
    /// [`RELEASE_MAX_RETRIES`] on etag conflict, re-reading the ticket each
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns [`WaitlistError::NotFound`] if the ticket does not exist, or
    /// [`WaitlistError::Conflict`] after retries are exhausted.
    pub async fn release(&self, ticket_uuid: Uuid) -> Result<(), WaitlistError> {
        for attempt in 0..RELEASE_MAX_RETRIES {
            let record = self
                .store
                .get(BUCKET, &ticket_uuid.to_string())
                .await?
                .ok_or_else(|| WaitlistError::NotFound {
                    uuid: ticket_uuid.to_string(),
                })?;

            let mut ticket = Ticket::from_value(record.value)?;
            if ticket.status.is_terminal() {
                return Ok(());
            }

            ticket.status = TicketStatus::Finished;
            ticket.updated_at = chrono::Utc::now();
            let value = ticket.to_value()?;

            match self
                .store
                .put(BUCKET, &ticket_uuid.to_string(), value, Some(&record.etag))
                .await
            {
                Ok(_) => {
                    info!(uuid = %ticket_uuid, "ticket released");
                    self.wake.notify_one();
                    return Ok(());
                }
                Err(StorageError::Conflict { .. }) => {
                    warn!(uuid = %ticket_uuid, attempt, "release conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(WaitlistError::Conflict {
            uuid: ticket_uuid.to_string(),
            attempts: RELEASE_MAX_RETRIES,
        })
    }

    /// Unconditionally delete a single ticket.
    ///
    /// # Errors
    ///
    /// Returns [`WaitlistError::NotFound`] if the ticket does not exist.
    pub async fn delete(&self, ticket_uuid: Uuid) -> Result<(), WaitlistError> {
        let existing = self.store.get(BUCKET, &ticket_uuid.to_string()).await?;
        if existing.is_none() {
            return Err(WaitlistError::NotFound {
                uuid: ticket_uuid.to_string(),
            });
        }
        self.store.delete(BUCKET, &ticket_uuid.to_string()).await?;
        info!(uuid = %ticket_uuid, "ticket deleted");
        Ok(())
    }

    /// Delete every ticket belonging to `server_uuid`. Requires `force`
    /// (the HTTP layer is responsible for rejecting requests that omit
    /// it; the manager enforces the same rule so it can't be bypassed by
    /// another caller).
    ///
    /// # Errors
    ///
    /// Returns [`WaitlistError::PreconditionFailed`] if `force` is false.
    pub async fn delete_all(&self, server_uuid: &str, force: bool) -> Result<u64, WaitlistError> {
        if !force {
            return Err(WaitlistError::PreconditionFailed {
                reason: "force=true is required to delete all tickets for a server".to_owned(),
            });
        }

        let count = self
            .store
            .delete_matching(
                BUCKET,
                &Filter::Eq {
                    attribute: "server_uuid".to_owned(),
                    value: serde_json::json!(server_uuid),
                },
            )
            .await?;

        info!(server_uuid, count, "all tickets deleted for server");
        Ok(count)
    }

    /// List tickets belonging to a server.
    ///
    /// # Errors
    ///
    /// Returns [`WaitlistError::InvalidArgument`] if `limit` exceeds
    /// [`LIST_MAX_LIMIT`].
    pub async fn list(&self, params: &ListParams) -> Result<Vec<Ticket>, WaitlistError> {
        if params.limit == 0 || params.limit > LIST_MAX_LIMIT {
            return Err(WaitlistError::InvalidArgument {
                reason: format!("limit must be between 1 and {LIST_MAX_LIMIT}"),
            });
        }

        let query = FindQuery::new()
            .with_filter(Filter::Eq {
                attribute: "server_uuid".to_owned(),
                value: serde_json::json!(params.server_uuid),
            })
            .with_sort(vec![SortKey::new(params.attribute.clone(), params.order)])
            .with_limit(params.limit)
            .with_offset(params.offset);

        let records = self.store.find(BUCKET, &query).await?;
        records.into_iter().map(|r| Ticket::from_value(r.value)).collect()
    }

    /// Fetch a single ticket by uuid.
    ///
    /// # Errors
    ///
    /// Returns [`WaitlistError::NotFound`] if the ticket does not exist.
    pub async fn get(&self, ticket_uuid: Uuid) -> Result<Ticket, WaitlistError> {
        let record = self
            .store
            .get(BUCKET, &ticket_uuid.to_string())
            .await?
            .ok_or_else(|| WaitlistError::NotFound {
                uuid: ticket_uuid.to_string(),
            })?;
        Ticket::from_value(record.value)
    }

    /// Helper shared by `create`'s queue-snapshot and the director's sweep:
    /// every non-terminal ticket for `(server_uuid, scope, id)`, ordered
    /// `(created_at, uuid)`.
    async fn queue_for(&self, server_uuid: &str, scope: &str, id: &str) -> Result<Vec<Ticket>, WaitlistError> {
        let query = FindQuery::new()
            .with_filter(Filter::And(
                Box::new(Filter::Eq {
                    attribute: "server_uuid".to_owned(),
                    value: serde_json::json!(server_uuid),
                }),
                Box::new(Filter::And(
                    Box::new(Filter::Eq {
                        attribute: "scope".to_owned(),
                        value: serde_json::json!(scope),
                    }),
                    Box::new(Filter::Eq {
                        attribute: "id".to_owned(),
                        value: serde_json::json!(id),
                    }),
                )),
            ))
            .with_sort(vec![
                SortKey::new("created_at", SortOrder::Asc),
                SortKey::new("uuid", SortOrder::Asc),
            ]);

        let records = self.store.find(BUCKET, &query).await?;
        let tickets: Result<Vec<Ticket>, WaitlistError> =
            records.into_iter().map(|r| Ticket::from_value(r.value)).collect();
        let tickets = tickets?;
        Ok(tickets
            .into_iter()
            .filter(|t| matches!(t.status, TicketStatus::Queued | TicketStatus::Active))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use waitlist_store::MemoryBackend;

    fn manager() -> QueueManager {
        QueueManager::new(Arc::new(MemoryBackend::new()), Arc::new(tokio::sync::Notify::new()))
    }

    fn create_params(scope: &str, id: &str) -> CreateParams {
        CreateParams {
            server_uuid: "srv-1".to_owned(),
            scope: scope.to_owned(),
            id: id.to_owned(),
            expires_at: (chrono::Utc::now() + chrono::Duration::seconds(60)).to_rfc3339(),
            action: None,
            extra: None,
            req_id: "req-1".to_owned(),
        }
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let qm = manager();
        let outcome = qm.create(create_params("vm", "A")).await.unwrap();
        assert_eq!(outcome.queue, vec![outcome.uuid]);

        let ticket = qm.get(outcome.uuid).await.unwrap();
        assert_eq!(ticket.scope, "vm");
        assert_eq!(ticket.status, TicketStatus::Queued);
    }

    #[tokio::test]
    async fn release_on_queued_ticket_finishes_it() {
        let qm = manager();
        let outcome = qm.create(create_params("vm", "A")).await.unwrap();
        qm.release(outcome.uuid).await.unwrap();

        let ticket = qm.get(outcome.uuid).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Finished);
    }

    #[tokio::test]
    async fn release_is_idempotent_on_terminal_ticket() {
        let qm = manager();
        let outcome = qm.create(create_params("vm", "A")).await.unwrap();
        qm.release(outcome.uuid).await.unwrap();
        qm.release(outcome.uuid).await.unwrap();
    }

    #[tokio::test]
    async fn release_unknown_ticket_not_found() {
        let qm = manager();
        let err = qm.release(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WaitlistError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_all_requires_force() {
        let qm = manager();
        qm.create(create_params("vm", "A")).await.unwrap();
        let err = qm.delete_all("srv-1", false).await.unwrap_err();
        assert!(matches!(err, WaitlistError::PreconditionFailed { .. }));

        let count = qm.delete_all("srv-1", true).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn list_rejects_oversized_limit() {
        let qm = manager();
        let err = qm
            .list(&ListParams {
                server_uuid: "srv-1".to_owned(),
                limit: LIST_MAX_LIMIT + 1,
                ..ListParams::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WaitlistError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn queue_for_is_scoped_and_ordered() {
        let qm = manager();
        let a = qm.create(create_params("vm", "A")).await.unwrap();
        let b = qm.create(create_params("vm", "A")).await.unwrap();
        qm.create(create_params("vm", "B")).await.unwrap();

        let queue = qm.queue_for("srv-1", "vm", "A").await.unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].uuid, a.uuid);
        assert_eq!(queue[1].uuid, b.uuid);
    }
}
