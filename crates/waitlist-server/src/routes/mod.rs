//! HTTP route modules.

pub mod tickets;
