//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transfer outcomes and latency
//! - Approvals and deposits sent
//! - Completion polling
//! - Source chain health

use crate::error::{BridgeError, BridgeResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Transfer metrics
    pub static ref TRANSFERS_STARTED: Counter = register_counter!(
        "usdcx_bridge_transfers_started_total",
        "Total transfer attempts started"
    ).unwrap();

    pub static ref TRANSFERS_FINISHED: CounterVec = register_counter_vec!(
        "usdcx_bridge_transfers_finished_total",
        "Total transfer attempts finished by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref TRANSFER_LATENCY: Histogram = register_histogram!(
        "usdcx_bridge_transfer_latency_seconds",
        "Time from start to observed Stacks mint",
        vec![30.0, 60.0, 120.0, 180.0, 300.0, 450.0, 600.0, 900.0]
    ).unwrap();

    // Source chain transactions
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "usdcx_bridge_transactions_submitted_total",
        "Total source chain transactions submitted",
        &["kind"]
    ).unwrap();

    // Completion polling
    pub static ref POLL_ATTEMPTS: Counter = register_counter!(
        "usdcx_bridge_poll_attempts_total",
        "Total Stacks event log checks"
    ).unwrap();

    // Health metrics
    pub static ref SOURCE_CONNECTED: Gauge = register_gauge!(
        "usdcx_bridge_source_connected",
        "Source chain connection status (1=connected, 0=disconnected)"
    ).unwrap();

    pub static ref HEALTH_CHECK_SUCCESS: Counter = register_counter!(
        "usdcx_bridge_health_check_success_total",
        "Total successful health checks"
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: Counter = register_counter!(
        "usdcx_bridge_health_check_failure_total",
        "Total failed health checks"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> BridgeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| BridgeError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Text exposition of the default registry
pub fn render() -> BridgeResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| BridgeError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| BridgeError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_transfer_started() {
    TRANSFERS_STARTED.inc();
}

/// `outcome` is `success`, `error` or `cancelled`
pub fn record_transfer_finished(outcome: &str) {
    TRANSFERS_FINISHED.with_label_values(&[outcome]).inc();
}

pub fn record_transfer_latency(latency_secs: f64) {
    TRANSFER_LATENCY.observe(latency_secs);
}

pub fn record_tx_submitted(kind: &str) {
    TX_SUBMITTED.with_label_values(&[kind]).inc();
}

pub fn record_poll_attempt() {
    POLL_ATTEMPTS.inc();
}

pub fn record_source_health(healthy: bool) {
    SOURCE_CONNECTED.set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        record_tx_submitted("deposit");
        record_transfer_finished("cancelled");

        let text = render().unwrap();
        assert!(text.contains("usdcx_bridge_transactions_submitted_total{kind=\"deposit\"}"));
        assert!(text.contains("usdcx_bridge_transfers_finished_total{outcome=\"cancelled\"}"));
    }
}
