//! Retry coordinator with exponential backoff, additive jitter, and
//! classification-driven stop conditions.
//!
//! Each failure goes through [`classify`]. Non-retryable kinds stop at once.
//! Retryable kinds wait and try again until the attempt budget is spent. A
//! delay suggested by the classification replaces the computed backoff for
//! that attempt. Waiting goes through a [`Sleeper`], which by default is a
//! tokio timer, so no thread is blocked and no lock is held while suspended.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RetryConfig;
use crate::core::classifier::{classify, ClassifiedError, RawFailure};
use crate::util::clock::{Clock, SystemClock};

/// Suspends the retry loop between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `delay`.
    async fn sleep(&self, delay: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Sleeper that returns immediately and remembers every requested delay.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().push(delay);
    }
}

/// One failed attempt that was followed by a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// One-based attempt number that failed.
    pub attempt: u32,
    /// Wait applied before the next attempt.
    pub delay_ms: u64,
    /// Classification of the failure.
    pub error: ClassifiedError,
    /// When the failure was observed.
    pub at_ms: u64,
}

/// Successful result with retry bookkeeping.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    /// Value returned by the operation.
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Failed attempts that were retried.
    pub retries: Vec<RetryAttempt>,
}

/// Terminal failure: either non-retryable or out of attempts.
#[derive(Debug, Clone, Error)]
#[error("{classification} (after {attempts} attempt(s))")]
pub struct RetryError {
    /// Classification of the last failure.
    pub classification: ClassifiedError,
    /// Attempts made in total.
    pub attempts: u32,
    /// The last raw failure.
    pub last_failure: RawFailure,
    /// Failed attempts that were retried before the terminal one.
    pub retries: Vec<RetryAttempt>,
}

impl RetryError {
    /// True when the loop stopped because the budget ran out rather than
    /// because the error was non-retryable.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.classification.retryable
    }
}

/// Executes operations under a retry policy.
#[derive(Clone)]
pub struct RetryCoordinator {
    policy: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryCoordinator {
    /// Coordinator using the tokio timer and system clock.
    #[must_use]
    pub fn new(policy: RetryConfig) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the clock used to stamp attempts.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Active policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryConfig {
        &self.policy
    }

    /// Exponential component for a one-based attempt: `base * mult^(n-1)`,
    /// capped at `max_delay_ms`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.policy.base_delay_ms as f64 * self.policy.backoff_multiplier.powi(exponent);
        let cap = self.policy.max_delay_ms as f64;
        if raw.is_nan() || raw >= cap {
            self.policy.max_delay_ms
        } else {
            raw as u64
        }
    }

    /// Delay before the attempt after `attempt`: the suggested delay when the
    /// classification carries one, otherwise capped backoff plus jitter.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32, classified: &ClassifiedError) -> u64 {
        classified
            .suggested_delay_ms
            .unwrap_or_else(|| self.backoff_ms(attempt).saturating_add(self.jitter_ms()))
    }

    fn jitter_ms(&self) -> u64 {
        if self.policy.jitter_ms == 0 {
            return 0;
        }
        rand::rng().random_range(0..=self.policy.jitter_ms)
    }

    /// Run `operation` with the configured attempt budget and no hook.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<RetryOutcome<T>, RetryError>
    where
        Op: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, RawFailure>> + Send,
        T: Send,
    {
        self.execute_with_retry(operation, self.policy.max_attempts, None)
            .await
    }

    /// Run `operation` up to `max_attempts` times.
    ///
    /// `on_retry(attempt, delay_ms)` fires before each wait. Intermediate
    /// failures are only visible through the hook; the caller receives either
    /// the value or one terminal [`RetryError`].
    pub async fn execute_with_retry<T, Fut, Op>(
        &self,
        mut operation: Op,
        max_attempts: u32,
        mut on_retry: Option<&mut (dyn FnMut(u32, u64) + Send)>,
    ) -> Result<RetryOutcome<T>, RetryError>
    where
        Op: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, RawFailure>> + Send,
        T: Send,
    {
        let max_attempts = max_attempts.max(1);
        let mut retries = Vec::new();
        let mut attempt = 1;

        loop {
            let failure = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                        retries,
                    });
                }
                Err(failure) => failure,
            };

            let classified = classify(&failure);
            if !classified.retryable || attempt >= max_attempts {
                tracing::error!(
                    attempt,
                    kind = %classified.kind,
                    retryable = classified.retryable,
                    "operation failed terminally: {}",
                    failure
                );
                return Err(RetryError {
                    classification: classified,
                    attempts: attempt,
                    last_failure: failure,
                    retries,
                });
            }

            let delay_ms = self.delay_ms(attempt, &classified);
            tracing::warn!(
                attempt,
                delay_ms,
                kind = %classified.kind,
                "operation failed, retrying: {}",
                failure
            );
            if let Some(hook) = on_retry.as_deref_mut() {
                hook(attempt, delay_ms);
            }
            retries.push(RetryAttempt {
                attempt,
                delay_ms,
                error: classified,
                at_ms: self.clock.now_ms(),
            });

            self.sleeper.sleep(Duration::from_millis(delay_ms)).await;
            attempt += 1;
        }
    }
}
