//! Metrics collection and exposition.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus recorder");

    tracing::info!("metrics listening on http://{}", addr);
}

/// Count one switched request by outcome
/// ("forwarded", "not_found", "too_large", "plug_gone", "timed_out").
pub fn record_switched(outcome: &'static str) {
    counter!("webx_requests_total", "outcome" => outcome).increment(1);
}

/// Track the number of connected plugs.
pub fn record_plugs(delta: i64) {
    gauge!("webx_plugs_connected").increment(delta as f64);
}
