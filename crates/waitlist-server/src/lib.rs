//! Waitlist HTTP server.
//!
//! Wires the core queue manager, director, and waiter registry into a
//! running Axum server exposing the ticket contract at `/servers/*` and
//! `/tickets/*`.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
