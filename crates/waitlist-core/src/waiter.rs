//! In-process waiter registry.
//!
//! Maps a ticket uuid to the set of callers blocked on `/wait`. The
//! director fires these sinks when a ticket reaches `active`, `expired`,
//! or `finished`; a dropped receiver (client disconnect) makes the
//! paired send a silent no-op, so cancellation needs no extra
//! bookkeeping here.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use uuid::Uuid;
use waitlist_store::StorageBackend;

use crate::error::WaitlistError;
use crate::ticket::{Ticket, TicketStatus, BUCKET};

/// A handle returned by [`WaiterRegistry::register`]. Resolves once, either
/// immediately (the ticket was already terminal/active) or later, when the
/// director fires it.
pub enum WaitHandle {
    /// The ticket was already `active`, `expired`, or `finished` at
    /// registration time.
    Resolved(TicketStatus),
    /// Waiting on the director to fire this sink.
    Pending(oneshot::Receiver<TicketStatus>),
}

impl WaitHandle {
    /// Block until the ticket reaches a resolved status, or the sender is
    /// dropped (registry shutdown) in which case the last known status is
    /// returned.
    pub async fn wait(self) -> TicketStatus {
        match self {
            Self::Resolved(status) => status,
            Self::Pending(rx) => rx.await.unwrap_or(TicketStatus::Queued),
        }
    }
}

/// Process-local map from ticket uuid to pending completion sinks.
#[derive(Default)]
pub struct WaiterRegistry {
    sinks: Mutex<HashMap<Uuid, Vec<oneshot::Sender<TicketStatus>>>>,
}

impl std::fmt::Debug for WaiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaiterRegistry").finish_non_exhaustive()
    }
}

impl WaiterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a ticket's completion.
    ///
    /// Reads the current ticket status from `store` first; if it is
    /// already `active`, `expired`, or `finished`, returns a pre-resolved
    /// handle without touching the sink map.
    ///
    /// # Errors
    ///
    /// Returns [`WaitlistError::NotFound`] if the ticket does not exist.
    pub async fn register(
        &self,
        store: &dyn StorageBackend,
        ticket_uuid: Uuid,
    ) -> Result<WaitHandle, WaitlistError> {
        let record = store
            .get(BUCKET, &ticket_uuid.to_string())
            .await?
            .ok_or_else(|| WaitlistError::NotFound {
                uuid: ticket_uuid.to_string(),
            })?;
        let ticket = Ticket::from_value(record.value)?;

        if ticket.status != TicketStatus::Queued {
            return Ok(WaitHandle::Resolved(ticket.status));
        }

        let (tx, rx) = oneshot::channel();
        #[allow(clippy::unwrap_used)]
        self.sinks.lock().unwrap().entry(ticket_uuid).or_default().push(tx);
        Ok(WaitHandle::Pending(rx))
    }

    /// Resolve and remove every sink registered for `ticket_uuid`.
    /// Idempotent — firing an absent or already-fired ticket is a no-op.
    pub fn fire(&self, ticket_uuid: Uuid, status: TicketStatus) {
        #[allow(clippy::unwrap_used)]
        let sinks = self.sinks.lock().unwrap().remove(&ticket_uuid);
        if let Some(sinks) = sinks {
            for sink in sinks {
                let _ = sink.send(status);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use waitlist_store::MemoryBackend;

    async fn queued_ticket(store: &MemoryBackend) -> Uuid {
        let ticket = crate::ticket::CreateParams {
            server_uuid: "srv-1".to_owned(),
            scope: "vm".to_owned(),
            id: "A".to_owned(),
            expires_at: (chrono::Utc::now() + chrono::Duration::seconds(60)).to_rfc3339(),
            action: None,
            extra: None,
            req_id: "req-1".to_owned(),
        }
        .into_ticket()
        .unwrap();
        let uuid = ticket.uuid;
        store.put(BUCKET, &uuid.to_string(), ticket.to_value().unwrap(), None).await.unwrap();
        uuid
    }

    #[tokio::test]
    async fn register_on_unknown_ticket_not_found() {
        let registry = WaiterRegistry::new();
        let store = MemoryBackend::new();
        let err = registry.register(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WaitlistError::NotFound { .. }));
    }

    #[tokio::test]
    async fn register_then_fire_resolves() {
        let registry = WaiterRegistry::new();
        let store = MemoryBackend::new();
        let uuid = queued_ticket(&store).await;

        let handle = registry.register(&store, uuid).await.unwrap();
        registry.fire(uuid, TicketStatus::Active);
        let status = handle.wait().await;
        assert_eq!(status, TicketStatus::Active);
    }

    #[tokio::test]
    async fn fire_on_unregistered_ticket_is_a_no_op() {
        let registry = WaiterRegistry::new();
        registry.fire(Uuid::new_v4(), TicketStatus::Expired);
    }

    #[tokio::test]
    async fn multiple_waiters_all_resolve() {
        let registry = WaiterRegistry::new();
        let store = MemoryBackend::new();
        let uuid = queued_ticket(&store).await;

        let h1 = registry.register(&store, uuid).await.unwrap();
        let h2 = registry.register(&store, uuid).await.unwrap();
        registry.fire(uuid, TicketStatus::Finished);

        assert_eq!(h1.wait().await, TicketStatus::Finished);
        assert_eq!(h2.wait().await, TicketStatus::Finished);
    }
}
