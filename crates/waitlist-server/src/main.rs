//! Waitlist server entry point.
//!
//! Bootstraps the storage backend, queue manager, director, and waiter
//! registry, then starts the Axum HTTP server with graceful shutdown. The
//! director runs as a background task and is stopped after the HTTP
//! listener drains.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use waitlist_core::director::{Director, DirectorHandle};
use waitlist_core::queue::QueueManager;
use waitlist_core::waiter::WaiterRegistry;
use waitlist_store::StorageBackend;

use waitlist_server::config::{ServerConfig, StorageBackendType};
use waitlist_server::routes;
use waitlist_server::state::AppState;

use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = config.storage_backend.label(), "waitlist server starting");

    let (state, director_handle) = build_app_state(&config).await?;

    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "waitlist server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("stopping director");
    tokio::time::timeout(Duration::from_secs(10), director_handle.stop())
        .await
        .ok();

    info!("waitlist server stopped");
    Ok(())
}

/// Build the shared application state and start the background director.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<(Arc<AppState>, DirectorHandle)> {
    let store: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist, single process only)");
            Arc::new(waitlist_store::MemoryBackend::new())
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url } => {
            info!("using PostgreSQL storage");
            Arc::new(
                waitlist_store::PostgresBackend::connect(url)
                    .await
                    .context("failed to connect to PostgreSQL storage")?,
            )
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => {
            anyhow::bail!(
                "PostgreSQL backend requested but feature 'postgres-backend' is not enabled"
            );
        }
    };

    let wake = Arc::new(tokio::sync::Notify::new());
    let waiters = Arc::new(WaiterRegistry::new());
    let queue_manager = Arc::new(QueueManager::new(Arc::clone(&store), Arc::clone(&wake)));

    let director = Director::new(
        Arc::clone(&store),
        Arc::clone(&waiters),
        wake,
        Duration::from_secs(config.sweep_interval_secs),
    );
    let director_handle = director.spawn().await;

    let state = Arc::new(AppState {
        queue_manager,
        waiters,
        store,
    });

    Ok((state, director_handle))
}

/// Build the Axum router with all routes and middleware.
fn build_router(state: Arc<AppState>) -> Router {
    routes::tickets::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, draining connections");
}
