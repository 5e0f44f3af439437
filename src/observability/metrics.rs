//! Session metrics.
//!
//! # Metrics
//! - `proxy_ws_sessions_total` (counter): relayed sessions started
//! - `proxy_ws_sessions_active` (gauge): sessions currently relaying
//! - `proxy_ws_handshake_failures_total` (counter): failed handshakes by stage
//! - `proxy_ws_messages_total` (counter): data frames forwarded by direction
//!
//! Recording is a no-op until a recorder is installed, so the proxy core
//! records unconditionally.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_started() {
    metrics::counter!("proxy_ws_sessions_total").increment(1);
    metrics::gauge!("proxy_ws_sessions_active").increment(1.0);
}

pub fn record_session_finished() {
    metrics::gauge!("proxy_ws_sessions_active").decrement(1.0);
}

/// `stage` is one of `upgrade`, `resolve` or `dial`.
pub fn record_handshake_failure(stage: &'static str) {
    metrics::counter!("proxy_ws_handshake_failures_total", "stage" => stage).increment(1);
}

pub fn record_message(direction: &'static str) {
    metrics::counter!("proxy_ws_messages_total", "direction" => direction).increment(1);
}
