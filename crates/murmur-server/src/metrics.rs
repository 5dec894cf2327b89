//! Metrics collection and export for Murmur.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "murmur_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "murmur_connections_active";
    pub const PARTICIPANTS_ACTIVE: &str = "murmur_participants_active";
    pub const INBOUND_TOTAL: &str = "murmur_inbound_events_total";
    pub const INBOUND_BYTES: &str = "murmur_inbound_bytes";
    pub const BROADCASTS_TOTAL: &str = "murmur_broadcasts_total";
    pub const REJECTED_TOTAL: &str = "murmur_rejected_events_total";
    pub const LATENCY_SECONDS: &str = "murmur_latency_seconds";
    pub const ERRORS_TOTAL: &str = "murmur_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_gauge!(
        names::PARTICIPANTS_ACTIVE,
        "Current number of joined participants"
    );
    metrics::describe_counter!(names::INBOUND_TOTAL, "Total number of inbound events");
    metrics::describe_counter!(names::INBOUND_BYTES, "Total bytes of inbound events");
    metrics::describe_counter!(
        names::BROADCASTS_TOTAL,
        "Total number of events broadcast, by type"
    );
    metrics::describe_counter!(
        names::REJECTED_TOTAL,
        "Total number of rejected inbound events, by reason"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound event processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of transport errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an inbound event.
pub fn record_inbound(bytes: usize) {
    counter!(names::INBOUND_TOTAL).increment(1);
    counter!(names::INBOUND_BYTES).increment(bytes as u64);
}

/// Record a broadcast.
pub fn record_broadcast(kind: &'static str) {
    counter!(names::BROADCASTS_TOTAL, "type" => kind).increment(1);
}

/// Record a rejected event.
pub fn record_rejected(reason: &'static str) {
    counter!(names::REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record event processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update the joined participant count.
pub fn set_participants(count: usize) {
    gauge!(names::PARTICIPANTS_ACTIVE).set(count as f64);
}

/// Record a transport error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        // No recorder installed: every call is a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_inbound(42);
        record_broadcast("CHAT");
        record_rejected("protocol");
        set_participants(3);
    }
}
