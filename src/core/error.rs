//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::retry::RetryError;
use crate::util::serde::JobId;

/// Errors produced by admission components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Breaker is open and the fallback policy refused the job.
    #[error("circuit breaker open: admission rejected")]
    BreakerOpen,
    /// Queue is full for the target pool.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// No active or queued job carries this id.
    #[error("unknown job: {0}")]
    UnknownJob(JobId),
    /// A job with this id is already active or queued.
    #[error("duplicate job: {0}")]
    DuplicateJob(JobId),
    /// Job was withdrawn before it was admitted.
    #[error("job {0} cancelled before admission")]
    Cancelled(JobId),
    /// Job held its slot past the configured deadline and was reclaimed.
    #[error("job {0} exceeded its slot deadline")]
    SlotExpired(JobId),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Execution failed after classification and retries.
    #[error(transparent)]
    Execution(#[from] RetryError),
    /// Runtime or channel failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// Attempts made before failing, when the failure came from execution.
    #[must_use]
    pub const fn attempts(&self) -> Option<u32> {
        match self {
            Self::Execution(err) => Some(err.attempts),
            _ => None,
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
