//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transaction submission and confirmation
//! - Retry and permanent-failure counts
//! - Signing requests
//! - Chunk latency

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::path::Path;
use tracing::info;

lazy_static! {
    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "approver_transactions_submitted_total",
        "Total approval transactions accepted by the RPC node",
        &[]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "approver_transactions_confirmed_total",
        "Total approval transactions confirmed",
        &["commitment"]
    ).unwrap();

    pub static ref TX_RETRIED: CounterVec = register_counter_vec!(
        "approver_transactions_retried_total",
        "Total batches carried into another attempt",
        &[]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "approver_transactions_failed_total",
        "Total batches failed permanently, by reason",
        &["reason"]
    ).unwrap();

    // Wallet metrics
    pub static ref SIGNING_REQUESTS: CounterVec = register_counter_vec!(
        "approver_signing_requests_total",
        "Total batch signing requests sent to the wallet",
        &[]
    ).unwrap();

    // Asset metrics
    pub static ref ASSETS_APPROVED: CounterVec = register_counter_vec!(
        "approver_assets_approved_total",
        "Total assets with a confirmed delegate approval",
        &[]
    ).unwrap();

    pub static ref ASSETS_FAILED: CounterVec = register_counter_vec!(
        "approver_assets_failed_total",
        "Total assets whose approval never confirmed",
        &[]
    ).unwrap();

    pub static ref CHUNK_LATENCY: HistogramVec = register_histogram_vec!(
        "approver_chunk_duration_seconds",
        "Time from first build to terminal state per chunk",
        &[],
        vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();
}

/// Render all registered metrics in the text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Write the text exposition to `path` for a textfile collector
pub fn write_textfile(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, render())?;
    info!("Metrics written to {}", path.display());
    Ok(())
}

// Helper functions to record metrics

pub fn record_tx_submitted() {
    TX_SUBMITTED.with_label_values(&[]).inc();
}

pub fn record_tx_confirmed(commitment: &str) {
    TX_CONFIRMED.with_label_values(&[commitment]).inc();
}

pub fn record_tx_retried() {
    TX_RETRIED.with_label_values(&[]).inc();
}

pub fn record_tx_failed(reason: &str) {
    TX_FAILED.with_label_values(&[reason]).inc();
}

pub fn record_signing_request() {
    SIGNING_REQUESTS.with_label_values(&[]).inc();
}

pub fn record_assets_approved(count: usize) {
    ASSETS_APPROVED.with_label_values(&[]).inc_by(count as f64);
}

pub fn record_assets_failed(count: usize) {
    ASSETS_FAILED.with_label_values(&[]).inc_by(count as f64);
}

pub fn record_chunk_latency(latency_secs: f64) {
    CHUNK_LATENCY.with_label_values(&[]).observe(latency_secs);
}
