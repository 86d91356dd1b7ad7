//! Job records and the values returned by admission calls.

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::serde::{JobId, Priority};

/// Metadata describing a job; everything except the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Unique job identifier.
    pub id: JobId,
    /// Priority tier for admission and queue ordering.
    pub priority: Priority,
    /// Caller that owns the job. Attribution only.
    pub owner_id: String,
    /// Entity the job is about. Attribution only.
    pub subject_id: String,
    /// Submission timestamp; FIFO tie-break within a tier.
    pub submitted_at_ms: u64,
    /// Caller's guess at run time.
    pub estimated_duration_ms: Option<u64>,
}

/// One request for a compute slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "P: serde::Serialize"))]
#[serde(bound(deserialize = "P: serde::de::DeserializeOwned"))]
pub struct Job<P> {
    /// Metadata driving scheduling decisions.
    pub meta: JobMetadata,
    /// Opaque payload handed to the executor.
    pub payload: P,
}

impl<P> Job<P> {
    /// Create a job with a fresh id, stamped with the current wall-clock time.
    ///
    /// Schedulers running on an injected clock should build jobs through
    /// `AdmissionScheduler::new_job` instead.
    pub fn new(
        priority: Priority,
        owner_id: impl Into<String>,
        subject_id: impl Into<String>,
        payload: P,
    ) -> Self {
        Self {
            meta: JobMetadata {
                id: JobId::new(),
                priority,
                owner_id: owner_id.into(),
                subject_id: subject_id.into(),
                submitted_at_ms: now_ms(),
                estimated_duration_ms: None,
            },
            payload,
        }
    }

    /// Override the submission timestamp.
    #[must_use]
    pub const fn submitted_at(mut self, submitted_at_ms: u64) -> Self {
        self.meta.submitted_at_ms = submitted_at_ms;
        self
    }

    /// Attach a run-time hint.
    #[must_use]
    pub const fn with_estimated_duration(mut self, duration_ms: u64) -> Self {
        self.meta.estimated_duration_ms = Some(duration_ms);
        self
    }

    /// Job identifier.
    pub const fn id(&self) -> JobId {
        self.meta.id
    }

    /// Priority tier.
    pub const fn priority(&self) -> Priority {
        self.meta.priority
    }
}

/// Outcome of a submission that was not refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// The job holds a slot; the caller should start it now.
    RunNow,
    /// The job waits in the queue.
    Queued {
        /// One-based position in the wait queue at submission time.
        position: usize,
        /// Rough wait before admission.
        estimated_wait_ms: u64,
    },
}

impl AdmissionDecision {
    /// Whether the job may start immediately.
    #[must_use]
    pub const fn run_now(&self) -> bool {
        matches!(self, Self::RunNow)
    }

    /// Queue position, if queued.
    #[must_use]
    pub const fn queue_position(&self) -> Option<usize> {
        match self {
            Self::RunNow => None,
            Self::Queued { position, .. } => Some(*position),
        }
    }

    /// Estimated wait, if queued.
    #[must_use]
    pub const fn estimated_wait_ms(&self) -> Option<u64> {
        match self {
            Self::RunNow => None,
            Self::Queued {
                estimated_wait_ms, ..
            } => Some(*estimated_wait_ms),
        }
    }
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Jobs holding a slot.
    pub active: usize,
    /// Jobs waiting for a slot.
    pub queued: usize,
    /// Configured slot count.
    pub max_concurrent: usize,
    /// `active / max_concurrent * 100`.
    pub utilization_pct: f64,
    /// Utilisation at or above the degrade threshold.
    pub saturated: bool,
    /// Breaker state at snapshot time.
    pub breaker_open: bool,
    /// Breaker failure counter at snapshot time.
    pub failure_count: u32,
}
