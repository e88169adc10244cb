//! Adaptive concurrency control
//!
//! Replaces a fixed concurrency bound with a window that shrinks
//! multiplicatively when the remote service throttles and grows additively
//! after a streak of clean successes.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{BatchError, Result};

/// Tuning knobs for the adaptive window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Window size at the start of a run
    pub initial: usize,
    /// Smallest window, never below 1
    pub floor: usize,
    /// Largest window
    pub ceiling: usize,
    /// Multiplier applied on a rate-limit signal, in (0, 1)
    pub decrease_factor: f64,
    /// Added after a full success streak
    pub increase_step: usize,
    /// Consecutive clean successes needed to grow
    pub success_streak: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial: 5,
            floor: 1,
            ceiling: 20,
            decrease_factor: 0.5,
            increase_step: 1,
            success_streak: 10,
        }
    }
}

impl AdaptiveConfig {
    pub fn with_initial(mut self, initial: usize) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_bounds(mut self, floor: usize, ceiling: usize) -> Self {
        self.floor = floor;
        self.ceiling = ceiling;
        self
    }

    pub fn with_decrease_factor(mut self, factor: f64) -> Self {
        self.decrease_factor = factor;
        self
    }

    pub fn with_increase_step(mut self, step: usize) -> Self {
        self.increase_step = step;
        self
    }

    pub fn with_success_streak(mut self, streak: usize) -> Self {
        self.success_streak = streak;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.floor == 0 {
            return Err(BatchError::InvalidOptions("floor must be at least 1".into()));
        }
        if !(self.floor <= self.initial && self.initial <= self.ceiling) {
            return Err(BatchError::InvalidOptions(format!(
                "expected floor <= initial <= ceiling, got {} / {} / {}",
                self.floor, self.initial, self.ceiling
            )));
        }
        if !(self.decrease_factor > 0.0 && self.decrease_factor < 1.0) {
            return Err(BatchError::InvalidOptions(format!(
                "decrease_factor must be in (0, 1), got {}",
                self.decrease_factor
            )));
        }
        if self.increase_step == 0 || self.success_streak == 0 {
            return Err(BatchError::InvalidOptions(
                "increase_step and success_streak must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of the window and its history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    pub current: usize,
    pub peak: usize,
    pub lowest: usize,
    pub decreases: usize,
    pub increases: usize,
}

#[derive(Debug)]
struct WindowState {
    window: usize,
    streak: usize,
    peak: usize,
    lowest: usize,
    decreases: usize,
    increases: usize,
}

impl WindowState {
    fn starting_at(initial: usize) -> Self {
        Self {
            window: initial,
            streak: 0,
            peak: initial,
            lowest: initial,
            decreases: 0,
            increases: 0,
        }
    }
}

/// Owns the concurrency window for one batch invocation
#[derive(Debug)]
pub struct AdaptiveController {
    config: AdaptiveConfig,
    state: Mutex<WindowState>,
    current: AtomicUsize,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig) -> Result<Self> {
        config.validate()?;
        let initial = config.initial;
        Ok(Self {
            config,
            state: Mutex::new(WindowState::starting_at(initial)),
            current: AtomicUsize::new(initial),
        })
    }

    /// Return the window to `config.initial` and clear streak and history.
    ///
    /// Called at the start of every run so a window never carries over
    /// from one batch to the next.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = WindowState::starting_at(self.config.initial);
        self.current.store(self.config.initial, Ordering::Release);
    }

    /// Current permitted number of in-flight operations
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Feed one recorded outcome into the policy and return the new window
    pub fn observe(&self, success: bool, rate_limited: bool) -> usize {
        let mut state = self.state.lock();
        let before = state.window;

        if rate_limited {
            let shrunk = (state.window as f64 * self.config.decrease_factor).floor() as usize;
            state.window = shrunk.min(state.window.saturating_sub(1)).max(self.config.floor);
            state.streak = 0;
            if state.window < before {
                state.decreases += 1;
                info!(from = before, to = state.window, "Rate limit observed, shrinking window");
            }
        } else if success {
            state.streak += 1;
            if state.streak >= self.config.success_streak {
                state.streak = 0;
                state.window = (state.window + self.config.increase_step).min(self.config.ceiling);
                if state.window > before {
                    state.increases += 1;
                    debug!(from = before, to = state.window, "Success streak, growing window");
                }
            }
        } else {
            state.streak = 0;
        }

        state.peak = state.peak.max(state.window);
        state.lowest = state.lowest.min(state.window);
        self.current.store(state.window, Ordering::Release);
        state.window
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let state = self.state.lock();
        WindowSnapshot {
            current: state.window,
            peak: state.peak,
            lowest: state.lowest,
            decreases: state.decreases,
            increases: state.increases,
        }
    }
}
