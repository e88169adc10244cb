//! Batch executor
//!
//! Runs many independent remote calls with:
//! - Bounded concurrency through a fixed or adaptive admission gate
//! - Per-item failure isolation
//! - Rate-limit retries with exponential backoff
//! - Outcomes reordered by submission position
//! - Progress callbacks, structured logging and metrics

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::adaptive::{AdaptiveConfig, AdaptiveController};
use super::error::ClassifyFailure;
use super::retry::{RetryExecutor, RetryPolicy};
use super::types::{BatchReport, Outcome, ProgressCallback, RunOptions, WorkItem};
use crate::{metrics, Result};

/// Decides how many operations may be in flight before each admission
enum AdmissionGate<'a> {
    Fixed(usize),
    Adaptive(&'a AdaptiveController),
}

impl AdmissionGate<'_> {
    fn limit(&self) -> usize {
        match self {
            AdmissionGate::Fixed(limit) => *limit,
            AdmissionGate::Adaptive(controller) => controller.current(),
        }
    }

    fn observe<O, E>(&self, batch_id: &Uuid, outcome: &Outcome<O, E>) {
        if let AdmissionGate::Adaptive(controller) = self {
            let window = controller.observe(outcome.is_success(), outcome.rate_limited);
            metrics::set_concurrency_window(batch_id, window);
        }
    }

    fn publish(&self, batch_id: &Uuid) {
        if let AdmissionGate::Adaptive(controller) = self {
            metrics::set_concurrency_window(batch_id, controller.current());
        }
    }

    fn retire(&self, batch_id: &Uuid) {
        if let AdmissionGate::Adaptive(_) = self {
            metrics::clear_concurrency_window(batch_id);
        }
    }
}

/// Executes a batch of independent items against a remote API
pub struct BatchExecutor {
    retry_policy: RetryPolicy,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("retry_policy", &self.retry_policy)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl BatchExecutor {
    pub fn new() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            progress_callback: None,
        }
    }

    /// Set the backoff used when `retry_on_rate_limit` is enabled
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set progress callback, called with (recorded, total) after each outcome
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Run every item through `operation` with at most
    /// `options.max_concurrent` calls in flight.
    ///
    /// Per-item failures never make this return `Err`; they are recorded
    /// as outcomes. `Err` means the options themselves were invalid.
    pub async fn run<T, F, Fut, O, E>(
        &self,
        items: Vec<T>,
        operation: F,
        options: &RunOptions,
    ) -> Result<BatchReport<O, E>>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<O, E>>,
        E: ClassifyFailure + Display,
    {
        options.validate()?;
        let batch_id = Uuid::new_v4();
        let span = info_span!("batch", %batch_id, items = items.len(), mode = "fixed");
        let gate = AdmissionGate::Fixed(options.max_concurrent);
        self.execute(batch_id, items, &operation, options, gate)
            .instrument(span)
            .await
    }

    /// Run the batch with a concurrency window that adapts to throttling.
    ///
    /// `options.max_concurrent` is ignored; the window starts at
    /// `config.initial` and moves between `config.floor` and `config.ceiling`.
    pub async fn run_adaptive<T, F, Fut, O, E>(
        &self,
        items: Vec<T>,
        operation: F,
        options: &RunOptions,
        config: AdaptiveConfig,
    ) -> Result<BatchReport<O, E>>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<O, E>>,
        E: ClassifyFailure + Display,
    {
        let controller = AdaptiveController::new(config)?;
        self.run_with_controller(items, operation, options, &controller).await
    }

    /// Adaptive run against a caller-owned controller, which lets the
    /// caller watch the window while the batch is in progress.
    ///
    /// The controller is reset to its initial window first, so reusing one
    /// controller across runs never carries a window or its history over.
    pub async fn run_with_controller<T, F, Fut, O, E>(
        &self,
        items: Vec<T>,
        operation: F,
        options: &RunOptions,
        controller: &AdaptiveController,
    ) -> Result<BatchReport<O, E>>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<O, E>>,
        E: ClassifyFailure + Display,
    {
        controller.reset();
        let batch_id = Uuid::new_v4();
        let span = info_span!("batch", %batch_id, items = items.len(), mode = "adaptive");
        let gate = AdmissionGate::Adaptive(controller);
        let mut report = self
            .execute(batch_id, items, &operation, options, gate)
            .instrument(span)
            .await?;

        let window = controller.snapshot();
        info!(
            final_window = window.current,
            peak = window.peak,
            lowest = window.lowest,
            decreases = window.decreases,
            increases = window.increases,
            "Adaptive window summary"
        );
        report.window = Some(window);
        Ok(report)
    }

    async fn execute<T, F, Fut, O, E>(
        &self,
        batch_id: Uuid,
        items: Vec<T>,
        operation: &F,
        options: &RunOptions,
        gate: AdmissionGate<'_>,
    ) -> Result<BatchReport<O, E>>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<O, E>>,
        E: ClassifyFailure + Display,
    {
        let started_at = Utc::now();
        let batch_start = Instant::now();
        let total = items.len();

        if items.is_empty() {
            info!("No items to execute in batch");
            return Ok(BatchReport::new(batch_id, started_at, batch_start.elapsed(), Vec::new()));
        }

        info!(
            total,
            initial_limit = gate.limit(),
            continue_on_error = options.continue_on_error,
            retry_on_rate_limit = options.retry_on_rate_limit,
            "Starting batch execution"
        );

        let retry = if options.retry_on_rate_limit {
            RetryExecutor::new(self.retry_policy.clone())
        } else {
            RetryExecutor::disabled()
        };

        let mut pending = items
            .into_iter()
            .enumerate()
            .map(|(index, value)| WorkItem { index, value });
        let mut in_flight = FuturesUnordered::new();
        let mut outcomes = Vec::with_capacity(total);
        let mut halted = false;
        gate.publish(&batch_id);

        loop {
            // Admit until the gate is full; the limit is re-read every time
            while !halted && in_flight.len() < gate.limit() {
                match pending.next() {
                    Some(item) => {
                        debug!(
                            index = item.index,
                            in_flight = in_flight.len() + 1,
                            "Admitting item"
                        );
                        in_flight.push(execute_item(item, operation, &retry));
                    }
                    None => break,
                }
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };

            gate.observe(&batch_id, &outcome);
            metrics::record_outcome(&outcome);

            match &outcome.result {
                Ok(_) => debug!(
                    index = outcome.index,
                    attempts = outcome.attempts,
                    duration_ms = outcome.duration.as_millis() as u64,
                    "Item completed"
                ),
                Err(e) => warn!(
                    index = outcome.index,
                    attempts = outcome.attempts,
                    rate_limited = outcome.rate_limited,
                    error = %e,
                    "Item failed"
                ),
            }

            if !outcome.is_success() && !options.continue_on_error && !halted {
                halted = true;
                warn!(
                    index = outcome.index,
                    "Failure with continue_on_error disabled, halting admissions"
                );
            }

            outcomes.push(outcome);
            if let Some(ref callback) = self.progress_callback {
                callback(outcomes.len(), total);
            }
        }

        gate.retire(&batch_id);
        let skipped = total - outcomes.len();
        let report = BatchReport::new(batch_id, started_at, batch_start.elapsed(), outcomes);
        metrics::record_batch(report.duration);

        info!(
            total,
            recorded = report.summary.total,
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            skipped,
            rate_limited = report.rate_limited_count(),
            success_rate = format!("{:.2}%", report.summary.success_rate()),
            batch_duration_ms = report.duration.as_millis() as u64,
            "Batch execution completed"
        );

        if report.summary.success_rate() < 80.0 && report.summary.total > 5 {
            warn!(
                success_rate = format!("{:.2}%", report.summary.success_rate()),
                failed = report.summary.failed,
                "High failure rate detected in batch execution"
            );
        }

        Ok(report)
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new()
    }
}

async fn execute_item<T, F, Fut, O, E>(
    item: WorkItem<T>,
    operation: &F,
    retry: &RetryExecutor,
) -> Outcome<O, E>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = std::result::Result<O, E>>,
    E: ClassifyFailure + Display,
{
    let start = Instant::now();
    let WorkItem { index, value } = item;
    let attempted = retry.execute(|| operation(value.clone())).await;

    Outcome {
        index,
        attempts: attempted.attempts,
        rate_limited: attempted.rate_limited,
        duration: start.elapsed(),
        result: attempted.result,
    }
}
