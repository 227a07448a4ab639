//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): proxied requests by method, status, upstream
//! - `gateway_request_duration_seconds` (histogram): latency distribution per upstream
//! - `gateway_rate_limited_total` (counter): denials by partition family

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one completed proxied request.
pub fn record_request(method: &str, status: u16, upstream: &'static str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "upstream" => upstream
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "upstream" => upstream)
        .record(start.elapsed().as_secs_f64());
}

/// Record one rate-limited request.
pub fn record_rate_limited(partition: &'static str) {
    counter!("gateway_rate_limited_total", "partition" => partition).increment(1);
}
