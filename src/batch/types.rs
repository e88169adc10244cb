use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use super::adaptive::WindowSnapshot;
use crate::{BatchError, Result};

/// Default number of operations allowed in flight at once
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// One submitted input tagged with its position in the original batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<T> {
    /// Zero-based position in the submitted collection
    pub index: usize,
    /// The caller's input value
    pub value: T,
}

/// Terminal result of one work item
#[derive(Debug, Clone)]
pub struct Outcome<O, E> {
    /// Position of the originating work item
    pub index: usize,
    /// Number of tries, always at least 1
    pub attempts: u32,
    /// Whether any attempt was throttled by the remote service
    pub rate_limited: bool,
    /// Wall time spent on this item, backoff included
    pub duration: Duration,
    /// Produced value or the final failure
    pub result: std::result::Result<O, E>,
}

impl<O, E> Outcome<O, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&O> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&E> {
        self.result.as_ref().err()
    }
}

impl<O: Serialize, E: Display> Serialize for Outcome<O, E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Outcome", 4)?;
        state.serialize_field("index", &self.index)?;
        state.serialize_field("success", &self.is_success())?;
        match &self.result {
            Ok(value) => state.serialize_field("data", value)?,
            Err(err) => state.serialize_field("error", &err.to_string())?,
        }
        state.serialize_field("attempts", &self.attempts)?;
        state.end()
    }
}

/// Aggregate counts over all recorded outcomes of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_outcomes<O, E>(outcomes: &[Outcome<O, E>]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
        }
    }

    /// Percentage of recorded items that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.succeeded as f64 / self.total as f64 * 100.0
    }
}

/// Per-invocation options supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    /// Maximum number of operations in flight at once
    pub max_concurrent: usize,
    /// Keep admitting items after a failure
    pub continue_on_error: bool,
    /// Retry rate-limited failures with backoff
    pub retry_on_rate_limit: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            continue_on_error: true,
            retry_on_rate_limit: true,
        }
    }
}

impl RunOptions {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_retry_on_rate_limit(mut self, retry_on_rate_limit: bool) -> Self {
        self.retry_on_rate_limit = retry_on_rate_limit;
        self
    }

    /// Parse options from a tool-call argument object.
    ///
    /// Missing keys fall back to defaults. A `maxConcurrent` that is not a
    /// positive integer is rejected rather than clamped.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        if let Some(raw) = value.get("maxConcurrent") {
            match raw.as_u64() {
                Some(n) if n > 0 => {}
                _ => {
                    return Err(BatchError::InvalidOptions(format!(
                        "maxConcurrent must be a positive integer, got {}",
                        raw
                    )))
                }
            }
        }
        let options: RunOptions = serde_json::from_value(value.clone())
            .map_err(|e| BatchError::InvalidOptions(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(BatchError::InvalidOptions(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything a caller gets back from one batch run
#[derive(Debug, Clone)]
pub struct BatchReport<O, E> {
    pub batch_id: Uuid,
    /// True iff no recorded outcome failed
    pub success: bool,
    pub summary: BatchSummary,
    /// Outcomes ordered by index
    pub results: Vec<Outcome<O, E>>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Final adaptive window, for adaptive runs only
    pub window: Option<WindowSnapshot>,
}

impl<O, E> BatchReport<O, E> {
    pub(crate) fn new(
        batch_id: Uuid,
        started_at: DateTime<Utc>,
        duration: Duration,
        mut results: Vec<Outcome<O, E>>,
    ) -> Self {
        results.sort_by_key(|o| o.index);
        let summary = BatchSummary::from_outcomes(&results);
        Self {
            batch_id,
            success: summary.failed == 0,
            summary,
            results,
            started_at,
            duration,
            window: None,
        }
    }

    /// Outcomes that failed, in index order
    pub fn failures(&self) -> impl Iterator<Item = &Outcome<O, E>> {
        self.results.iter().filter(|o| !o.is_success())
    }

    /// Number of outcomes that saw throttling on any attempt
    pub fn rate_limited_count(&self) -> usize {
        self.results.iter().filter(|o| o.rate_limited).count()
    }
}

impl<O: Serialize, E: Display> BatchReport<O, E> {
    /// Render the `{success, summary, results}` response body
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "success": self.success,
            "summary": serde_json::to_value(self.summary)?,
            "results": serde_json::to_value(&self.results)?,
        }))
    }
}

/// Callback for progress updates: (recorded, total submitted)
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
