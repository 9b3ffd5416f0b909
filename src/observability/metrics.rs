//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_requests_total` (counter): routed calls by service, outcome
//! - `router_request_duration_seconds` (histogram): end-to-end routing latency
//! - `router_backend_health` (gauge): 1=healthy, 0=unhealthy, per backend
//! - `router_health_checks_total` (counter): health checks by result
//! - `router_connections_created_total` (counter): backend connections by service
//! - `router_active_sessions` (gauge): open push sessions
//! - `router_events_dropped_total` (counter): events lost to a full sink
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op, so tests need no setup
//! - Labels stay low-cardinality: service names, not request ids

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(service: &str, outcome: &'static str, elapsed: Duration) {
    counter!("router_requests_total", "service" => service.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("router_request_duration_seconds", "service" => service.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("router_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_health_check(healthy: bool) {
    let result = if healthy { "pass" } else { "fail" };
    counter!("router_health_checks_total", "result" => result).increment(1);
}

pub fn record_connection_created(service: &str) {
    counter!("router_connections_created_total", "service" => service.to_string()).increment(1);
}

pub fn record_active_sessions(count: usize) {
    gauge!("router_active_sessions").set(count as f64);
}

pub fn record_event_dropped(kind: &'static str) {
    counter!("router_events_dropped_total", "kind" => kind).increment(1);
}
