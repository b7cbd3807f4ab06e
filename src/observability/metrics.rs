//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): proxied requests by backend, method, status
//! - `gateway_request_duration_seconds` (histogram): proxied request latency
//! - `gateway_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_breaker_rejections_total` (counter): calls refused by an open circuit
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_hub_subscribers` (gauge): connected subscribers
//! - `gateway_hub_dropped_total` (counter): broadcasts dropped on a full hub queue
//! - `gateway_hub_evictions_total` (counter): subscribers evicted for a full outbox
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the exporter
//! - Labels for backend, breaker, status code

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram, Label};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::BreakerState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(backend: &str, method: &str, status: u16, start: Instant) {
    let labels = vec![
        Label::new("backend", backend.to_string()),
        Label::new("method", method.to_string()),
        Label::new("status", status.to_string()),
    ];
    counter!("gateway_requests_total", labels.clone()).increment(1);
    histogram!("gateway_request_duration_seconds", labels).record(start.elapsed().as_secs_f64());
}

pub fn record_breaker_state(breaker: &str, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 1.0,
        BreakerState::Open => 2.0,
    };
    gauge!("gateway_breaker_state", "breaker" => breaker.to_string()).set(value);
}

pub fn record_breaker_rejected(breaker: &str) {
    counter!("gateway_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("gateway_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_subscribers(count: usize) {
    gauge!("gateway_hub_subscribers").set(count as f64);
}

pub fn record_hub_dropped() {
    counter!("gateway_hub_dropped_total").increment(1);
}

pub fn record_hub_eviction() {
    counter!("gateway_hub_evictions_total").increment(1);
}
