//! Failure classification for remote calls
//!
//! The engine only needs to know one thing about a failure: did the remote
//! service throttle us? Anything implementing [`ClassifyFailure`] can be
//! used as the error type of a batch operation. [`ApiError`] is the
//! implementation used by the monitoring REST client.

use std::time::Duration;

use thiserror::Error;

/// Classifier predicate supplied by the remote-call layer
pub trait ClassifyFailure {
    /// True when the remote service explicitly signaled throttling
    fn is_rate_limited(&self) -> bool;

    /// Server-provided hint for how long to wait before retrying
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Errors returned by calls against the monitoring platform's REST API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// Map an HTTP status and error body onto the failure taxonomy
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = message.into();
        match status {
            429 => ApiError::RateLimited { message, retry_after },
            401 | 403 => ApiError::PermissionDenied(message),
            404 => ApiError::NotFound(message),
            400 | 422 => ApiError::Validation(message),
            _ => ApiError::Status { status, message },
        }
    }

    /// Convenience constructor for a throttled response
    pub fn rate_limited(message: impl Into<String>) -> Self {
        ApiError::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }
}

impl ClassifyFailure for ApiError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Rate-limit state advertised by the remote platform in response headers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests allowed per window
    pub limit: Option<u32>,
    /// Requests left in the current window
    pub remaining: Option<u32>,
    /// Window length
    pub window: Option<Duration>,
    /// Explicit wait requested by the server
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    pub const LIMIT_HEADER: &'static str = "x-rate-limit-limit";
    pub const REMAINING_HEADER: &'static str = "x-rate-limit-remaining";
    pub const WINDOW_HEADER: &'static str = "x-rate-limit-window";
    pub const RETRY_AFTER_HEADER: &'static str = "retry-after";

    /// Collect rate-limit headers from `(name, value)` pairs.
    ///
    /// Header names match case-insensitively. Window and Retry-After are
    /// in seconds; unparseable values are ignored.
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut info = Self::default();
        for (name, value) in headers {
            let value = value.trim();
            let name = name.to_ascii_lowercase();
            match name.as_str() {
                Self::LIMIT_HEADER => info.limit = value.parse().ok(),
                Self::REMAINING_HEADER => info.remaining = value.parse().ok(),
                Self::WINDOW_HEADER => info.window = value.parse().ok().map(Duration::from_secs),
                Self::RETRY_AFTER_HEADER => {
                    info.retry_after = value.parse().ok().map(Duration::from_secs)
                }
                _ => {}
            }
        }
        info
    }

    /// True when the server reports no requests left in this window
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// How long to wait before the next request is likely to be accepted
    pub fn suggested_delay(&self) -> Option<Duration> {
        if self.retry_after.is_some() {
            return self.retry_after;
        }
        if self.is_exhausted() {
            return self.window;
        }
        None
    }
}
