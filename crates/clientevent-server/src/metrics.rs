//! Metrics collection and export for ClientEvent.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Without an installed recorder every call is a no-op.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "clientevent_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "clientevent_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "clientevent_connections_rejected_total";
    pub const ROOMS_ACTIVE: &str = "clientevent_rooms_active";
    pub const EVENTS_TOTAL: &str = "clientevent_events_total";
    pub const EVENTS_BYTES: &str = "clientevent_events_bytes";
    pub const LISTENER_FAILURES_TOTAL: &str = "clientevent_listener_failures_total";
    pub const ERRORS_TOTAL: &str = "clientevent_errors_total";
}

/// Describe all metrics.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of registered connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused at accept time"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of non-empty rooms");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of events processed");
    metrics::describe_counter!(names::EVENTS_BYTES, "Total payload bytes of events processed");
    metrics::describe_counter!(
        names::LISTENER_FAILURES_TOTAL,
        "Application listeners that returned an error or panicked"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a connection refused before registration.
pub fn record_rejected(reason: &'static str) {
    counter!(names::CONNECTIONS_REJECTED, "reason" => reason).increment(1);
}

/// Record an event in the given direction (`inbound` or `outbound`).
pub fn record_event(bytes: usize, direction: &'static str) {
    counter!(names::EVENTS_TOTAL, "direction" => direction).increment(1);
    counter!(names::EVENTS_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a failed listener invocation.
pub fn record_listener_failure(listener: &'static str) {
    counter!(names::LISTENER_FAILURES_TOTAL, "listener" => listener).increment(1);
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Counts a registered connection for as long as it lives.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
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
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
