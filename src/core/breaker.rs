//! Failure-counting circuit breaker with lazy recovery.
//!
//! The breaker has two states. It opens once the failure counter reaches the
//! threshold and closes on the first [`CircuitBreaker::is_open`] check made
//! more than `recovery_time_ms` after the last failure. There is no half-open
//! trial phase; the first check after the window closes it outright.
//!
//! The breaker holds no lock of its own. The scheduler keeps it inside the same
//! critical section as the active set and wait queue.

use serde::{Deserialize, Serialize};

use crate::config::BreakerConfig;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Normal admission.
    Closed,
    /// Admission restricted by the fallback policy.
    Open,
}

/// Circuit breaker counters.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_time_ms: u64,
    failure_count: u32,
    last_failure_at_ms: Option<u64>,
    open: bool,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub const fn new(failure_threshold: u32, recovery_time_ms: u64) -> Self {
        Self {
            failure_threshold,
            recovery_time_ms,
            failure_count: 0,
            last_failure_at_ms: None,
            open: false,
        }
    }

    /// Create a closed breaker from configuration.
    #[must_use]
    pub const fn from_config(cfg: &BreakerConfig) -> Self {
        Self::new(cfg.failure_threshold, cfg.recovery_time_ms)
    }

    /// Decrement the failure counter, floored at zero.
    ///
    /// One success does not erase a streak; each success only takes back a
    /// single failure.
    pub fn record_success(&mut self) {
        self.failure_count = self.failure_count.saturating_sub(1);
    }

    /// Count a failure at `now_ms`, opening once the threshold is reached.
    pub fn record_failure(&mut self, now_ms: u64) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at_ms = Some(now_ms);
        if !self.open && self.failure_count >= self.failure_threshold {
            self.open = true;
            tracing::warn!(
                failures = self.failure_count,
                threshold = self.failure_threshold,
                "circuit breaker opened"
            );
        }
    }

    /// Whether the breaker is open at `now_ms`.
    ///
    /// Closes and resets the counter once the recovery window has elapsed.
    pub fn is_open(&mut self, now_ms: u64) -> bool {
        if self.open {
            let last = self.last_failure_at_ms.unwrap_or(now_ms);
            if now_ms.saturating_sub(last) > self.recovery_time_ms {
                self.open = false;
                self.failure_count = 0;
                tracing::info!(
                    quiet_ms = now_ms.saturating_sub(last),
                    "circuit breaker closed after recovery window"
                );
            }
        }
        self.open
    }

    /// State at `now_ms`, applying lazy recovery.
    pub fn state(&mut self, now_ms: u64) -> BreakerState {
        if self.is_open(now_ms) {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }

    /// Current failure counter.
    #[must_use]
    pub const fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Timestamp of the most recent failure.
    #[must_use]
    pub const fn last_failure_at_ms(&self) -> Option<u64> {
        self.last_failure_at_ms
    }

    /// Configured recovery window.
    #[must_use]
    pub const fn recovery_time_ms(&self) -> u64 {
        self.recovery_time_ms
    }
}
