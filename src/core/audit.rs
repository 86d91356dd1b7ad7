//! Audit trail for admission decisions.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::serde::{JobId, Priority};

/// What happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Admitted on submission.
    Start,
    /// Placed in the wait queue.
    Enqueue,
    /// Promoted from the wait queue into a slot.
    Wake,
    /// Refused on submission.
    Reject,
    /// Completed successfully.
    Complete,
    /// Completed with a failure.
    Fail,
    /// Withdrawn from the queue.
    Cancel,
    /// Slot reclaimed after its deadline.
    Reclaim,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Enqueue => "enqueue",
            Self::Wake => "wake",
            Self::Reject => "reject",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
            Self::Reclaim => "reclaim",
        };
        f.write_str(name)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Related job.
    pub job_id: JobId,
    /// Pool that made the decision.
    pub pool: String,
    /// Job owner.
    pub owner_id: String,
    /// Job priority.
    pub priority: Priority,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u64,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Bounded in-memory trail of recent events.
///
/// The newest `max_events` events are retained; per-action totals cover
/// every event ever recorded, including evicted ones.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    recent: VecDeque<AuditEvent>,
    capacity: usize,
    totals: HashMap<AuditAction, u64>,
}

impl InMemoryAuditSink {
    /// Sink retaining at most `max_events` events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(max_events.min(1024)),
            capacity: max_events,
            totals: HashMap::new(),
        }
    }

    /// Retained events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.recent.iter().cloned().collect()
    }

    /// Retained events with the given action.
    #[must_use]
    pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.recent
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    /// Retained actions for one job, in order.
    #[must_use]
    pub fn history(&self, job_id: JobId) -> Vec<AuditAction> {
        self.recent
            .iter()
            .filter(|e| e.job_id == job_id)
            .map(|e| e.action)
            .collect()
    }

    /// Events ever recorded with the given action.
    #[must_use]
    pub fn total(&self, action: AuditAction) -> u64 {
        self.totals.get(&action).copied().unwrap_or(0)
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        *self.totals.entry(event.action).or_insert(0) += 1;
        if self.capacity == 0 {
            return;
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(event);
    }
}

/// Shared sinks let callers keep a handle for inspection.
impl<S: AuditSink> AuditSink for Arc<Mutex<S>> {
    fn record(&mut self, event: AuditEvent) {
        self.lock().record(event);
    }
}

/// Sink that forwards events to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::info!(
            target: "prometheus_admission::audit",
            job_id = %event.job_id,
            pool = %event.pool,
            owner = %event.owner_id,
            priority = %event.priority,
            action = %event.action,
            detail = event.detail.as_deref().unwrap_or(""),
            "admission audit"
        );
    }
}

/// Helper to build an audit event stamped with the current time.
pub fn build_audit_event(
    job_id: JobId,
    pool: impl Into<String>,
    owner_id: impl Into<String>,
    priority: Priority,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        job_id,
        pool: pool.into(),
        owner_id: owner_id.into(),
        priority,
        action,
        created_at_ms: now_ms(),
        detail,
    }
}
