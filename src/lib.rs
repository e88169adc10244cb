//! # Monitor Batch
//!
//! Bounded-concurrency batch execution for remote-monitoring operations.
//!
//! ## Overview
//!
//! Tool calls that touch many resources at once (create N devices, update N
//! groups, acknowledge N alerts) are fanned out to the monitoring
//! platform's REST API through a [`batch::BatchExecutor`]. The executor
//! bounds how many calls are in flight, keeps going when individual items
//! fail, retries calls the platform throttled, and reports every item's
//! fate by its original position.
//!
//! ## Quick Start
//!
//! ```rust
//! use monitor_batch::batch::{ApiError, BatchExecutor, RunOptions};
//!
//! # async fn example() -> monitor_batch::Result<()> {
//! let executor = BatchExecutor::new();
//! let device_ids = vec![101u32, 102, 103];
//!
//! let report = executor
//!     .run(
//!         device_ids,
//!         |id| async move {
//!             if id == 102 {
//!                 Err(ApiError::NotFound(format!("device {}", id)))
//!             } else {
//!                 Ok(id)
//!             }
//!         },
//!         &RunOptions::default().with_max_concurrent(2),
//!     )
//!     .await?;
//!
//! assert_eq!(report.summary.total, 3);
//! assert_eq!(report.summary.failed, 1);
//! assert!(!report.results[1].is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`batch`]: executor, retry wrapper, adaptive concurrency controller
//! - [`metrics`]: Prometheus counters and gauges
//! - [`telemetry`]: tracing subscriber setup

use thiserror::Error;

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors raised by the engine itself.
///
/// Per-item failures are never reported through this type; they are
/// recorded as [`batch::Outcome`]s.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Caller supplied options that violate the engine's contract
    #[error("Invalid batch options: {0}")]
    InvalidOptions(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Batch execution engine
pub mod batch;

/// Prometheus metrics
pub mod metrics;

/// Logging setup
pub mod telemetry;
