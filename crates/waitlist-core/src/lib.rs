//! Core library for the waitlist coordination primitive.
//!
//! Contains the ticket model, the queue manager, the background director,
//! and the in-process waiter registry. This crate depends on
//! `waitlist-store` for the storage backend trait and knows nothing about
//! HTTP, routing, or request validation — those live in `waitlist-server`.

pub mod director;
pub mod error;
pub mod queue;
pub mod ticket;
pub mod waiter;
