//! Shared application state for the waitlist server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the queue manager and the waiter
//! registry; the director runs independently in the background, woken by
//! the same `Notify` the queue manager signals on release.

use std::sync::Arc;

use waitlist_core::queue::QueueManager;
use waitlist_core::waiter::WaiterRegistry;
use waitlist_store::StorageBackend;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Create/release/delete/list operations over tickets.
    pub queue_manager: Arc<QueueManager>,
    /// In-process `/wait` registry, fired by the director.
    pub waiters: Arc<WaiterRegistry>,
    /// The storage backend, needed directly by `wait_ticket` to look up
    /// the current ticket status before registering.
    pub store: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
