//! Metrics collection and exposition.
//!
//! # Metrics
//! - `health_watch_errors_total` (counter): reported errors by kind
//! - `health_watch_snapshots_total` (counter): published snapshots by source
//! - `health_watch_probe_subscriptions_total` (counter): monitor lifecycle events
//! - `health_watch_node_status` (gauge): 1=passing, 0=anything else

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_watch_error(kind: &'static str) {
    counter!("health_watch_errors_total", "kind" => kind).increment(1);
}

pub fn record_snapshot_published(source: &'static str) {
    counter!("health_watch_snapshots_total", "source" => source).increment(1);
}

pub fn record_probe_subscriptions(event: &'static str, count: u64) {
    counter!("health_watch_probe_subscriptions_total", "event" => event).increment(count);
}

pub fn record_node_status(service: &str, node: &str, passing: bool) {
    gauge!(
        "health_watch_node_status",
        "service" => service.to_string(),
        "node" => node.to_string()
    )
    .set(if passing { 1.0 } else { 0.0 });
}
