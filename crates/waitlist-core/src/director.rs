//! The director: the background sweep that expires overdue tickets and
//! promotes queue heads.
//!
//! One director runs per process. It assumes nothing about being the only
//! instance in the cluster — coordination across processes happens purely
//! through etag-guarded store writes, so a lost race here is simply left
//! for the next sweep to re-observe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;
use waitlist_store::{Filter, FindQuery, SortKey, SortOrder, StorageBackend, StorageError};

use crate::ticket::{Ticket, TicketStatus, BUCKET};
use crate::waiter::WaiterRegistry;

/// A running director and the means to stop it.
pub struct DirectorHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handle: tokio::task::JoinHandle<()>,
}

impl DirectorHandle {
    /// Signal the director to stop and wait for its current sweep to
    /// finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join_handle.await {
            warn!(error = %e, "director task panicked during shutdown");
        }
    }
}

/// The director: periodically scans non-terminal tickets, expires the
/// overdue ones, and promotes the head of each queue that has no active
/// ticket.
pub struct Director {
    store: Arc<dyn StorageBackend>,
    waiters: Arc<WaiterRegistry>,
    wake: Arc<tokio::sync::Notify>,
    sweep_interval: Duration,
}

impl std::fmt::Debug for Director {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Director").finish_non_exhaustive()
    }
}

impl Director {
    #[must_use]
    pub fn new(
        store: Arc<dyn StorageBackend>,
        waiters: Arc<WaiterRegistry>,
        wake: Arc<tokio::sync::Notify>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            store,
            waiters,
            wake,
            sweep_interval,
        }
    }

    /// Run one sweep immediately (startup catch-up), then spawn the
    /// background loop that runs on `sweep_interval`, woken early by
    /// [`crate::queue::QueueManager::release`] via the shared `Notify`.
    pub async fn spawn(self) -> DirectorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        self.sweep_once().await;

        let join_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.sweep_interval);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep_once().await;
                    }
                    () = self.wake.notified() => {
                        self.sweep_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("director stopping");
                        return;
                    }
                }
            }
        });

        DirectorHandle {
            shutdown_tx,
            join_handle,
        }
    }

    /// Run a single sweep over every `queued`/`active` ticket.
    async fn sweep_once(&self) {
        let tickets = match self.load_non_terminal().await {
            Ok(tickets) => tickets,
            Err(e) => {
                warn!(error = %e, "director sweep failed to load tickets");
                return;
            }
        };

        for group in group_by_queue(tickets) {
            self.sweep_group(group).await;
        }
    }

    async fn load_non_terminal(&self) -> Result<Vec<Ticket>, StorageError> {
        let query = FindQuery::new()
            .with_filter(Filter::In {
                attribute: "status".to_owned(),
                values: vec![serde_json::json!("queued"), serde_json::json!("active")],
            })
            .with_sort(vec![
                SortKey::new("server_uuid", SortOrder::Asc),
                SortKey::new("scope", SortOrder::Asc),
                SortKey::new("id", SortOrder::Asc),
                SortKey::new("created_at", SortOrder::Asc),
                SortKey::new("uuid", SortOrder::Asc),
            ]);

        let records = self.store.find(BUCKET, &query).await?;
        Ok(records
            .into_iter()
            .filter_map(|r| Ticket::from_value(r.value).ok())
            .collect())
    }

    async fn sweep_group(&self, group: Vec<Ticket>) {
        let now = Utc::now();
        let mut remaining = Vec::with_capacity(group.len());

        for ticket in group {
            if ticket.status != TicketStatus::Expired && ticket.expires_at <= now {
                if self.transition(ticket.uuid, TicketStatus::Expired).await {
                    continue;
                }
            }
            remaining.push(ticket);
        }

        let has_active = remaining.iter().any(|t| t.status == TicketStatus::Active);
        if has_active {
            return;
        }

        if let Some(head) = remaining.into_iter().find(|t| t.status == TicketStatus::Queued) {
            self.transition(head.uuid, TicketStatus::Active).await;
        }
    }

    /// Attempt to transition `ticket_uuid` to `new_status`, etag-guarded.
    /// Returns `true` on success. A conflict from a concurrent director is
    /// benign — the next sweep re-observes state.
    async fn transition(&self, ticket_uuid: Uuid, new_status: TicketStatus) -> bool {
        let Ok(Some(record)) = self.store.get(BUCKET, &ticket_uuid.to_string()).await else {
            return false;
        };
        let Ok(mut ticket) = Ticket::from_value(record.value) else {
            return false;
        };
        if ticket.status.is_terminal() {
            return false;
        }

        ticket.status = new_status;
        ticket.updated_at = Utc::now();
        let Ok(value) = ticket.to_value() else {
            return false;
        };

        match self
            .store
            .put(BUCKET, &ticket_uuid.to_string(), value, Some(&record.etag))
            .await
        {
            Ok(_) => {
                info!(uuid = %ticket_uuid, status = %new_status, "ticket transitioned");
                self.waiters.fire(ticket_uuid, new_status);
                true
            }
            Err(StorageError::Conflict { .. }) => {
                debug!(uuid = %ticket_uuid, "transition conflict, deferring to next sweep");
                false
            }
            Err(e) => {
                warn!(uuid = %ticket_uuid, error = %e, "transition failed");
                false
            }
        }
    }
}

/// Partition tickets (already sorted by `(server_uuid, scope, id,
/// created_at, uuid)`) into contiguous per-queue groups.
fn group_by_queue(tickets: Vec<Ticket>) -> Vec<Vec<Ticket>> {
    let mut groups: Vec<Vec<Ticket>> = Vec::new();
    for ticket in tickets {
        match groups.last_mut() {
            Some(group) if same_queue(&group[0], &ticket) => group.push(ticket),
            _ => groups.push(vec![ticket]),
        }
    }
    groups
}

fn same_queue(a: &Ticket, b: &Ticket) -> bool {
    a.server_uuid == b.server_uuid && a.scope == b.scope && a.id == b.id
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::queue::QueueManager;
    use crate::ticket::CreateParams;
    use waitlist_store::MemoryBackend;

    fn create_params(scope: &str, id: &str, ttl_secs: i64) -> CreateParams {
        CreateParams {
            server_uuid: "srv-1".to_owned(),
            scope: scope.to_owned(),
            id: id.to_owned(),
            expires_at: (Utc::now() + chrono::Duration::seconds(ttl_secs)).to_rfc3339(),
            action: None,
            extra: None,
            req_id: "req-1".to_owned(),
        }
    }

    #[tokio::test]
    async fn sweep_promotes_head_of_fifo_queue() {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let wake = Arc::new(tokio::sync::Notify::new());
        let waiters = Arc::new(WaiterRegistry::new());
        let qm = QueueManager::new(Arc::clone(&store), Arc::clone(&wake));
        let director = Director::new(Arc::clone(&store), Arc::clone(&waiters), wake, Duration::from_secs(1));

        let t1 = qm.create(create_params("vm", "A", 60)).await.unwrap();
        let t2 = qm.create(create_params("vm", "A", 60)).await.unwrap();

        director.sweep_once().await;

        let ticket1 = qm.get(t1.uuid).await.unwrap();
        let ticket2 = qm.get(t2.uuid).await.unwrap();
        assert_eq!(ticket1.status, TicketStatus::Active);
        assert_eq!(ticket2.status, TicketStatus::Queued);

        qm.release(t1.uuid).await.unwrap();
        director.sweep_once().await;

        let ticket1 = qm.get(t1.uuid).await.unwrap();
        let ticket2 = qm.get(t2.uuid).await.unwrap();
        assert_eq!(ticket1.status, TicketStatus::Finished);
        assert_eq!(ticket2.status, TicketStatus::Active);
    }

    #[tokio::test]
    async fn sweep_expires_overdue_ticket_and_promotes_next() {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let wake = Arc::new(tokio::sync::Notify::new());
        let waiters = Arc::new(WaiterRegistry::new());
        let qm = QueueManager::new(Arc::clone(&store), Arc::clone(&wake));
        let director = Director::new(Arc::clone(&store), Arc::clone(&waiters), wake, Duration::from_secs(1));

        let t1 = qm.create(create_params("vm", "A", 1)).await.unwrap();
        let t2 = qm.create(create_params("vm", "A", 60)).await.unwrap();
        director.sweep_once().await; // t1 becomes active

        tokio::time::sleep(Duration::from_secs(2)).await;
        director.sweep_once().await; // t1 expires, t2 promoted

        let ticket1 = qm.get(t1.uuid).await.unwrap();
        let ticket2 = qm.get(t2.uuid).await.unwrap();
        assert_eq!(ticket1.status, TicketStatus::Expired);
        assert_eq!(ticket2.status, TicketStatus::Active);
    }

    #[tokio::test]
    async fn cross_scope_queues_do_not_interfere() {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let wake = Arc::new(tokio::sync::Notify::new());
        let waiters = Arc::new(WaiterRegistry::new());
        let qm = QueueManager::new(Arc::clone(&store), Arc::clone(&wake));
        let director = Director::new(Arc::clone(&store), Arc::clone(&waiters), wake, Duration::from_secs(1));

        let a = qm.create(create_params("vm", "A", 60)).await.unwrap();
        let b = qm.create(create_params("vm", "B", 60)).await.unwrap();
        director.sweep_once().await;

        assert_eq!(qm.get(a.uuid).await.unwrap().status, TicketStatus::Active);
        assert_eq!(qm.get(b.uuid).await.unwrap().status, TicketStatus::Active);
    }

    #[test]
    fn group_by_queue_partitions_contiguous_runs() {
        let mk = |scope: &str, id: &str| Ticket {
            uuid: Uuid::new_v4(),
            server_uuid: "srv-1".to_owned(),
            scope: scope.to_owned(),
            id: id.to_owned(),
            status: TicketStatus::Queued,
            action: String::new(),
            extra: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
            req_id: String::new(),
        };
        let tickets = vec![mk("vm", "A"), mk("vm", "A"), mk("vm", "B")];
        let groups = group_by_queue(tickets);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
    }
}
