//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (cache effectiveness, dispatch, pool occupancy)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_cache_lookups_total` (counter): lookups by `result` (hit, miss)
//! - `proxy_cache_stores_total` (counter): responses admitted to the cache
//! - `proxy_upstream_dispatch_total` (counter): requests by `path` (direct, queued)
//! - `proxy_upstream_recreated_total` (counter): failed upstreams replaced
//! - `proxy_pending_requests` (gauge): requests waiting for an upstream
//! - `proxy_idle_connections` (gauge): upstreams in the idle pool
//! - `proxy_assigned_connections` (gauge): upstreams serving a client
//! - `proxy_max_concurrent_connections` (gauge): high-watermark of assigned upstreams
//! - `proxy_client_connections` (gauge): open client connections
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Gauges are refreshed from an engine snapshot once per loop iteration

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::proxy::EngineStats;

/// Install the Prometheus exporter and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    ::metrics::counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_store() {
    ::metrics::counter!("proxy_cache_stores_total").increment(1);
}

/// `queued` is true when no upstream was idle and the request joined the
/// pending queue.
pub fn record_dispatch(queued: bool) {
    let path = if queued { "queued" } else { "direct" };
    ::metrics::counter!("proxy_upstream_dispatch_total", "path" => path).increment(1);
}

pub fn record_upstream_recreated() {
    ::metrics::counter!("proxy_upstream_recreated_total").increment(1);
}

pub fn record_engine_stats(stats: &EngineStats) {
    ::metrics::gauge!("proxy_pending_requests").set(stats.pending_requests as f64);
    ::metrics::gauge!("proxy_idle_connections").set(stats.idle_connections as f64);
    ::metrics::gauge!("proxy_assigned_connections").set(stats.assigned_connections as f64);
    ::metrics::gauge!("proxy_max_concurrent_connections").set(stats.max_concurrent_connections as f64);
    ::metrics::gauge!("proxy_client_connections").set(stats.client_connections as f64);
}
