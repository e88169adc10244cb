//! Metrics collection for batch execution
//!
//! Provides Prometheus-compatible metrics for item outcomes, retries,
//! rate-limit hits and the adaptive concurrency window.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGaugeVec, TextEncoder,
};
use uuid::Uuid;

use crate::batch::Outcome;

lazy_static! {
    /// Counter for recorded item outcomes
    static ref ITEMS: IntCounterVec = register_int_counter_vec!(
        "monitor_batch_items_total",
        "Total number of batch items with a terminal outcome",
        &["status"]
    ).expect("batch item counter registers once");

    /// Counter for backoff retries
    static ref RETRIES: IntCounter = register_int_counter!(
        "monitor_batch_retries_total",
        "Total number of rate-limit retries"
    ).expect("retry counter registers once");

    /// Counter for rate-limit signals from the remote API
    static ref RATE_LIMIT_HITS: IntCounter = register_int_counter!(
        "monitor_batch_rate_limit_hits_total",
        "Total number of rate-limited responses"
    ).expect("rate limit counter registers once");

    /// Gauge for the adaptive window of each running batch
    static ref CONCURRENCY_WINDOW: IntGaugeVec = register_int_gauge_vec!(
        "monitor_batch_concurrency_window",
        "Current adaptive concurrency window per running batch",
        &["batch_id"]
    ).expect("window gauge registers once");

    /// Histogram for batch duration
    static ref BATCH_DURATION: Histogram = register_histogram!(
        "monitor_batch_duration_seconds",
        "Batch execution duration in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).expect("batch duration histogram registers once");
}

pub fn record_outcome<O, E>(outcome: &Outcome<O, E>) {
    let status = if outcome.is_success() { "succeeded" } else { "failed" };
    ITEMS.with_label_values(&[status]).inc();
}

pub fn record_retry() {
    RETRIES.inc();
}

pub fn record_rate_limit_hit() {
    RATE_LIMIT_HITS.inc();
}

pub fn set_concurrency_window(batch_id: &Uuid, window: usize) {
    let label = batch_id.to_string();
    CONCURRENCY_WINDOW
        .with_label_values(&[label.as_str()])
        .set(window as i64);
}

/// Drop the window series of a finished batch
pub fn clear_concurrency_window(batch_id: &Uuid) {
    let label = batch_id.to_string();
    let _ = CONCURRENCY_WINDOW.remove_label_values(&[label.as_str()]);
}

pub fn record_batch(duration: Duration) {
    BATCH_DURATION.observe(duration.as_secs_f64());
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
