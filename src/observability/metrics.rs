//! Metrics collection and exposition.
//!
//! # Metrics
//! - `checkin_requests_total` (counter): check-in requests by outcome
//! - `checkin_verifications_total` (counter): payment verifications by outcome
//! - `settlement_records_total` (counter): worker record outcomes
//! - `settlement_tick_duration_seconds` (histogram): worker tick latency
//! - `chain_rpc_failures_total` (counter): RPC calls that failed on every endpoint
//! - `gateway_calls_total` (counter): payment gateway calls by operation and outcome
//! - `token_issuance_total` (counter): submitted issuance transactions by fee path

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_checkin_request(outcome: &'static str) {
    metrics::counter!("checkin_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_verification(outcome: &'static str) {
    metrics::counter!("checkin_verifications_total", "outcome" => outcome).increment(1);
}

pub fn record_settlement(outcome: &'static str) {
    metrics::counter!("settlement_records_total", "outcome" => outcome).increment(1);
}

pub fn record_tick_duration(seconds: f64) {
    metrics::histogram!("settlement_tick_duration_seconds").record(seconds);
}

pub fn record_rpc_failure(op: &'static str) {
    metrics::counter!("chain_rpc_failures_total", "op" => op).increment(1);
}

pub fn record_gateway_call(op: &'static str, outcome: &'static str) {
    metrics::counter!("gateway_calls_total", "op" => op, "outcome" => outcome).increment(1);
}

/// `path` is `fee_market` or `legacy`.
pub fn record_issuance(path: &'static str) {
    metrics::counter!("token_issuance_total", "path" => path).increment(1);
}
