//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Queue depths and traffic
//! - Deposit and signature progress
//! - Transaction dispatch per chain
//! - Chain and store health

use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Queue metrics
    pub static ref QUEUE_LENGTH: GaugeVec = register_gauge_vec!(
        "zero_keeper_queue_length",
        "Items currently in each queue",
        &["queue"]
    ).unwrap();

    pub static ref QUEUE_ENQUEUED: CounterVec = register_counter_vec!(
        "zero_keeper_queue_enqueued_total",
        "Total items pushed per queue",
        &["queue"]
    ).unwrap();

    pub static ref QUARANTINED: CounterVec = register_counter_vec!(
        "zero_keeper_quarantined_total",
        "Total items quarantined by source queue",
        &["queue"]
    ).unwrap();

    // Deposit metrics
    pub static ref PENDING_EXAMINED: CounterVec = register_counter_vec!(
        "zero_keeper_pending_examined_total",
        "Total pending request examinations",
        &[]
    ).unwrap();

    pub static ref DEPOSITS_CONFIRMED: CounterVec = register_counter_vec!(
        "zero_keeper_deposits_confirmed_total",
        "Total deposits confirmed",
        &[]
    ).unwrap();

    // Signature metrics
    pub static ref SIGNATURE_OUTCOMES: CounterVec = register_counter_vec!(
        "zero_keeper_signature_outcomes_total",
        "Settlement signature waits by outcome",
        &["outcome"]
    ).unwrap();

    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "zero_keeper_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "zero_keeper_transactions_submitted_total",
        "Total transactions submitted",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "zero_keeper_transactions_failed_total",
        "Total failed submissions",
        &["chain_id", "kind"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "zero_keeper_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "zero_keeper_health_check_failure_total",
        "Total failed health checks",
        &[]
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

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Config(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

fn render() -> RelayerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RelayerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| RelayerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_queue_length(queue: &str, len: usize) {
    QUEUE_LENGTH.with_label_values(&[queue]).set(len as f64);
}

pub fn record_enqueued(queue: &str) {
    QUEUE_ENQUEUED.with_label_values(&[queue]).inc();
}

pub fn record_quarantined(queue: &str) {
    QUARANTINED.with_label_values(&[queue]).inc();
}

pub fn record_pending_examined() {
    PENDING_EXAMINED.with_label_values(&[]).inc();
}

pub fn record_deposit_confirmed() {
    DEPOSITS_CONFIRMED.with_label_values(&[]).inc();
}

pub fn record_signature_outcome(outcome: &str) {
    SIGNATURE_OUTCOMES.with_label_values(&[outcome]).inc();
}

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_failed(chain_id: u64, permanent: bool) {
    let kind = if permanent { "permanent" } else { "transient" };
    TX_FAILED
        .with_label_values(&[&chain_id.to_string(), kind])
        .inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        record_queue_length("/test/render", 3);
        record_tx_failed(137, true);

        let text = render().unwrap();
        assert!(text.contains("zero_keeper_queue_length{queue=\"/test/render\"} 3"));
        assert!(text.contains("zero_keeper_transactions_failed_total{chain_id=\"137\",kind=\"permanent\"}"));
    }
}
