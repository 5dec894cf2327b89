//! # murmur-server
//!
//! WebSocket front end for the Murmur chat relay.
//!
//! Exposes one WebSocket endpoint (default `/ws`) for the shared room and a
//! `/health` endpoint. Metrics are exported in Prometheus format on a
//! separate port.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
