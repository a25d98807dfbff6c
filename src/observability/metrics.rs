//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define cache metrics (requests by outcome, latency, cache writes, errors)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `webcache_requests_total` (counter): connections served, by outcome
//! - `webcache_request_duration_seconds` (histogram): connection lifetime
//! - `webcache_cache_writes_total` (counter): responses stored
//! - `webcache_cache_resources` (gauge): distinct resources in the store
//! - `webcache_store_errors_total` (counter): store failures, by operation
//! - `webcache_origin_errors_total` (counter): failed origin exchanges
//! - `webcache_active_connections` (gauge): in-flight handlers
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Outcome labels are static strings so cardinality stays fixed

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(outcome: &'static str, start: Instant) {
    counter!("webcache_requests_total", "outcome" => outcome).increment(1);
    histogram!("webcache_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_write() {
    counter!("webcache_cache_writes_total").increment(1);
}

pub fn record_cache_size(resources: usize) {
    gauge!("webcache_cache_resources").set(resources as f64);
}

pub fn record_store_error(operation: &'static str) {
    counter!("webcache_store_errors_total", "operation" => operation).increment(1);
}

pub fn record_origin_error() {
    counter!("webcache_origin_errors_total").increment(1);
}

pub fn set_active_connections(count: u64) {
    gauge!("webcache_active_connections").set(count as f64);
}
