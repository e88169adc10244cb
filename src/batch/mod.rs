//! Bounded-concurrency batch execution
//!
//! [`BatchExecutor`] fans a collection of inputs out to a per-item async
//! operation, bounded by a fixed limit or an [`AdaptiveController`]
//! window, retrying rate-limited calls through [`RetryExecutor`].

pub mod adaptive;
pub mod error;
pub mod executor;
pub mod retry;
pub mod types;

pub use adaptive::*;
pub use error::*;
pub use executor::*;
pub use retry::*;
pub use types::*;
