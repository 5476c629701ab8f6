//! # Fleetgate Gateway
//!
//! The thin runtime around [`fleetgate_core`]: configuration loading, the
//! axum request surface, and the background wiring (health monitor, catalog
//! poller) that keeps the core's view of the fleet current.
//!
//! The binary lives in `main.rs`; everything here is a library so the
//! request surface can be driven in-process by tests.

pub mod config;
pub mod discovery;
pub mod handlers;
pub mod server;
