//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ts_proxy_connections_total` (counter): accepted connections
//! - `ts_proxy_active_connections` (gauge): current connection count
//! - `ts_proxy_dial_failures_total` (counter): upstream dials that failed
//! - `ts_proxy_transfer_errors_total` (counter): by kind (timeout, io)
//! - `ts_proxy_bytes_total` (counter): by direction
//! - `ts_proxy_requests_total` (counter): HTTP requests by status
//! - `ts_proxy_request_duration_seconds` (histogram): HTTP latency
//! - `ts_proxy_identity_failures_total` (counter): failed identity lookups
//! - `ts_proxy_redirects_total` (counter): canonical-host redirects
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_connection_opened() {
    metrics::counter!("ts_proxy_connections_total").increment(1);
    metrics::gauge!("ts_proxy_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    metrics::gauge!("ts_proxy_active_connections").decrement(1.0);
}

pub fn record_dial_failure() {
    metrics::counter!("ts_proxy_dial_failures_total").increment(1);
}

pub fn record_transfer_error(kind: &'static str) {
    metrics::counter!("ts_proxy_transfer_errors_total", "kind" => kind).increment(1);
}

pub fn record_bytes(to_upstream: u64, to_client: u64) {
    metrics::counter!("ts_proxy_bytes_total", "direction" => "to_upstream").increment(to_upstream);
    metrics::counter!("ts_proxy_bytes_total", "direction" => "to_client").increment(to_client);
}

pub fn record_request(status: u16, start: Instant) {
    metrics::counter!("ts_proxy_requests_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("ts_proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_identity_failure() {
    metrics::counter!("ts_proxy_identity_failures_total").increment(1);
}

pub fn record_redirect() {
    metrics::counter!("ts_proxy_redirects_total").increment(1);
}
