use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

use crate::models::MergeReport;

lazy_static! {
    // Hydration pass metrics
    pub static ref HYDRATION_PASSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "hydration_passes_total",
        "Total number of hydration passes by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref ANSWERS_MERGED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_merged_total",
        "Total number of remote answers merged into the local stores",
        &["kind"]
    )
    .unwrap();

    pub static ref ANSWERS_SKIPPED_TOTAL: IntCounter = register_int_counter!(
        "answers_skipped_total",
        "Total number of remote answers discarded because the local record was newer"
    )
    .unwrap();

    // Remote fetch metrics
    pub static ref REMOTE_FETCH_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "remote_fetch_attempts_total",
        "Total number of remote fetch attempts by result",
        &["result"]
    )
    .unwrap();

    // Store metrics
    pub static ref STORE_WRITE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "store_write_failures_total",
        "Total number of rejected durable writes by namespace",
        &["namespace"]
    )
    .unwrap();

    // Classification metrics
    pub static ref DECODE_DEGRADED_TOTAL: IntCounter = register_int_counter!(
        "decode_degraded_total",
        "Total number of chart payloads that failed decoding and degraded to plain text"
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

pub fn record_pass_outcome(outcome: &str) {
    HYDRATION_PASSES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_fetch_attempt(result: &str) {
    REMOTE_FETCH_ATTEMPTS_TOTAL
        .with_label_values(&[result])
        .inc();
}

pub fn record_store_failure(namespace: &str) {
    STORE_WRITE_FAILURES_TOTAL
        .with_label_values(&[namespace])
        .inc();
}

pub fn record_merged(report: &MergeReport) {
    let plain = report.merged.saturating_sub(report.charts);
    ANSWERS_MERGED_TOTAL
        .with_label_values(&["plain"])
        .inc_by(plain as u64);
    ANSWERS_MERGED_TOTAL
        .with_label_values(&["chart"])
        .inc_by(report.charts as u64);
    ANSWERS_SKIPPED_TOTAL.inc_by(report.skipped as u64);
}
