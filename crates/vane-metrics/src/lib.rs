//! Metrics collection and Prometheus exporter for vane.
//!
//! Counters for route and DNS decisions, match latency, and rule-set
//! registry state, recorded from the router's hot path.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total route decisions made, labeled by selected outbound.
pub const ROUTE_DECISIONS_TOTAL: &str = "vane_route_decisions_total";
/// Total route decisions that fell through to the final outbound.
pub const ROUTE_FINAL_TOTAL: &str = "vane_route_final_total";
/// Total DNS decisions made, labeled by selected server.
pub const DNS_DECISIONS_TOTAL: &str = "vane_dns_decisions_total";
/// Total DNS decisions that fell through to the final server.
pub const DNS_FINAL_TOTAL: &str = "vane_dns_final_total";
/// Total DNS matches deferred until the destination address is known.
pub const DNS_DEFERRED_TOTAL: &str = "vane_dns_deferred_total";
/// Rule evaluation duration histogram (seconds).
pub const MATCH_DURATION_SECONDS: &str = "vane_match_duration_seconds";
/// Number of rule-set bundles currently registered.
pub const RULE_SETS_ACTIVE: &str = "vane_rule_sets_active";
/// Total hot router swaps.
pub const ROUTER_UPDATES_TOTAL: &str = "vane_router_updates_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a route decision made by a matching rule.
/// Note: This function allocates a String for the label. For hot paths with repeated calls,
/// consider caching the String at the call site.
#[inline]
pub fn record_route_decision(outbound: &str) {
    counter!(ROUTE_DECISIONS_TOTAL, "outbound" => outbound.to_owned()).increment(1);
}

/// Record a route decision that used the final outbound.
#[inline]
pub fn record_route_final() {
    counter!(ROUTE_FINAL_TOTAL).increment(1);
}

/// Record a DNS decision made by a matching rule.
#[inline]
pub fn record_dns_decision(server: &str) {
    counter!(DNS_DECISIONS_TOTAL, "server" => server.to_owned()).increment(1);
}

/// Record a DNS decision that used the final server.
#[inline]
pub fn record_dns_final() {
    counter!(DNS_FINAL_TOTAL).increment(1);
}

/// Record a DNS match that must be confirmed once addresses resolve.
#[inline]
pub fn record_dns_deferred() {
    counter!(DNS_DEFERRED_TOTAL).increment(1);
}

/// Record how long one evaluation pass over the rules took.
#[inline]
pub fn record_match_duration(duration_secs: f64) {
    histogram!(MATCH_DURATION_SECONDS).record(duration_secs);
}

/// Set the number of registered rule-set bundles.
#[inline]
pub fn set_rule_sets_active(count: usize) {
    gauge!(RULE_SETS_ACTIVE).set(count as f64);
}

/// Record a hot router swap.
#[inline]
pub fn record_router_update() {
    counter!(ROUTER_UPDATES_TOTAL).increment(1);
}
