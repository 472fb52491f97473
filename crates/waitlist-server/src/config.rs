//! Server configuration for the waitlist server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `WAITLIST_*` environment variables.

use std::net::SocketAddr;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Director sweep interval in seconds (`T_sweep`).
    pub sweep_interval_secs: u64,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart, single process).
    Memory,
    /// `PostgreSQL` persistent storage, shared across control-plane processes.
    Postgres { url: String },
}

impl StorageBackendType {
    /// A short, credential-free label for logging — `Debug` on this enum
    /// would print the raw `DATABASE_URL`, including any embedded password.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (Railway convention, binds to `0.0.0.0`)
    /// - `WAITLIST_BIND_ADDR` — full bind address (overrides `PORT`, default: `127.0.0.1:8200`)
    /// - `WAITLIST_STORAGE` — `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL` — `PostgreSQL` connection string (required when `WAITLIST_STORAGE=postgres`)
    /// - `WAITLIST_LOG_LEVEL` — log filter (default: `info`)
    /// - `WAITLIST_SWEEP_INTERVAL_SECS` — seconds between director sweeps (default: `1`)
    #[must_use]
    pub fn from_env() -> Self {
        // Priority: WAITLIST_BIND_ADDR > PORT (Railway) > default 127.0.0.1:8200
        let bind_addr = if let Ok(addr) = std::env::var("WAITLIST_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8200)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8200);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8200))
        };

        let storage_backend = match std::env::var("WAITLIST_STORAGE")
            .unwrap_or_else(|_| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => {
                let url = std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/waitlist".to_owned());
                StorageBackendType::Postgres { url }
            }
            _ => StorageBackendType::Memory,
        };

        let log_level = std::env::var("WAITLIST_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let sweep_interval_secs = std::env::var("WAITLIST_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        Self {
            bind_addr,
            storage_backend,
            log_level,
            sweep_interval_secs,
        }
    }
}
