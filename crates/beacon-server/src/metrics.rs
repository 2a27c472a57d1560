//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const MESSAGES_TOTAL: &str = "beacon_messages_total";
    pub const MESSAGES_BYTES: &str = "beacon_messages_bytes";
    pub const EVENTS_DELIVERED: &str = "beacon_events_delivered_total";
    pub const EVENTS_DROPPED: &str = "beacon_events_dropped_total";
    pub const ROOMS_ACTIVE: &str = "beacon_rooms_active";
    pub const PULSES_STORED: &str = "beacon_pulses_stored_total";
    pub const PULSES_PURGED: &str = "beacon_pulses_purged_total";
    pub const AD_EVENTS: &str = "beacon_ad_events_total";
    pub const AD_CHARGE: &str = "beacon_ad_charge";
    pub const REVENUE_CREDITED: &str = "beacon_revenue_credited";
    pub const LATENCY_SECONDS: &str = "beacon_latency_seconds";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::EVENTS_DELIVERED,
        "Events accepted into connection outboxes"
    );
    metrics::describe_counter!(
        names::EVENTS_DROPPED,
        "Events dropped because an outbox was full"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_counter!(names::PULSES_STORED, "Pulses accepted into the store");
    metrics::describe_counter!(names::PULSES_PURGED, "Expired pulses removed by the sweeper");
    metrics::describe_counter!(names::AD_EVENTS, "Billable ad events metered");
    metrics::describe_histogram!(names::AD_CHARGE, "Amount charged per billable event");
    metrics::describe_histogram!(
        names::REVENUE_CREDITED,
        "Revenue share credited to content owners per event"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

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

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a fan-out.
pub fn record_delivery(event: &'static str, recipients: usize) {
    counter!(names::EVENTS_DELIVERED, "event" => event).increment(recipients as u64);
}

/// Publish router totals.
pub fn record_router_stats(rooms: usize, dropped: u64) {
    gauge!(names::ROOMS_ACTIVE).set(rooms as f64);
    counter!(names::EVENTS_DROPPED).absolute(dropped);
}

/// Record a stored pulse.
pub fn record_pulse() {
    counter!(names::PULSES_STORED).increment(1);
}

/// Record a retention sweep.
pub fn record_purge(removed: usize) {
    counter!(names::PULSES_PURGED).increment(removed as u64);
}

/// Record a metered ad event.
pub fn record_ad_event(event: &'static str, charged: Decimal, credited: Option<Decimal>) {
    counter!(names::AD_EVENTS, "event" => event).increment(1);
    histogram!(names::AD_CHARGE, "event" => event).record(charged.to_f64().unwrap_or_default());
    if let Some(credited) = credited {
        histogram!(names::REVENUE_CREDITED).record(credited.to_f64().unwrap_or_default());
    }
}

/// Record frame latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
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
    use rust_decimal_macros::dec;

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every call is a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_ad_event("click", dec!(0.5), Some(dec!(0.4)));
        record_router_stats(3, 7);
        record_error("validation");
    }
}
