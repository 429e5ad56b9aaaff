//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, service
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_upstream_health` (gauge): 1=online, 0=not online
//! - `gateway_streams_total` (counter): SSE relays by service, outcome
//!
//! # Design Decisions
//! - Recording is a no-op until the exporter is installed
//! - Labels for service, method, status code

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_counter!("gateway_requests_total", "Total requests handled by the gateway");
            describe_histogram!(
                "gateway_request_duration_seconds",
                "Time from request arrival to response headers"
            );
            describe_gauge!("gateway_upstream_health", "Last probe result per upstream");
            describe_counter!("gateway_streams_total", "Streaming relays by outcome");
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, service: &str, start: Instant) {
    counter!("gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "service" => service.to_string()
    )
    .increment(1);

    histogram!("gateway_request_duration_seconds",
        "method" => method.to_string(),
        "service" => service.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_health(service: &str, online: bool) {
    gauge!("gateway_upstream_health", "service" => service.to_string())
        .set(if online { 1.0 } else { 0.0 });
}

pub fn record_stream_outcome(service: &str, outcome: &'static str) {
    counter!(
        "gateway_streams_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
