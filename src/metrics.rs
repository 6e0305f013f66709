//! Ambient request/duration metrics, exposed via Prometheus text exposition.
//!
//! Mirrors the call-site shape already used throughout the request handlers:
//! one counter per (route, status) pair and one histogram per route.

use metrics::{counter, histogram};
use std::time::Instant;

pub fn record_request(route: &'static str, status: u16) {
    counter!("streamgate_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
}

pub fn record_duration(route: &'static str, start: Instant) {
    histogram!("streamgate_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_origin_error() {
    counter!("streamgate_origin_errors_total").increment(1);
}

pub fn record_extractor_handshake(site: &'static str) {
    counter!("streamgate_extractor_handshakes_total", "site" => site).increment(1);
}

pub fn record_extractor_cache_hit(site: &'static str, hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!("streamgate_extractor_cache_total", "site" => site, "outcome" => outcome)
        .increment(1);
}

/// Install the Prometheus recorder and return the exporter handle used by the
/// `/metrics` route to render the current text exposition.
pub fn install() -> metrics_exporter_prometheus::PrometheusHandle {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}
