//! Priority admission scheduler with an embedded circuit breaker.
//!
//! One `parking_lot::Mutex` guards the active set, the wait queue and the
//! breaker counters, so `submit`, `complete` and the breaker operations
//! behave as a single critical section. None of them suspend. Jobs promoted
//! out of the queue are handed to the dispatch callback after the lock is
//! released.
//!
//! Admission rule: a job runs immediately when
//! - it is `High` or `Critical` and a slot is free, or
//! - fewer than `floor(max_concurrent * reserved_fraction)` slots are taken.
//!
//! Otherwise it waits, ordered by priority then submission time. Low priority
//! work can starve under sustained high priority load; that is intended.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{FallbackStrategy, PoolConfig};
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::breaker::{BreakerState, CircuitBreaker};
use crate::core::job::{AdmissionDecision, Job, JobMetadata, SchedulerSnapshot};
use crate::core::wait_queue::WaitQueue;
use crate::core::SchedulerError;
use crate::util::clock::{Clock, SystemClock};
use crate::util::serde::{JobId, Priority};

/// Weight of the newest sample in the rolling duration average.
const DURATION_EWMA_ALPHA: f64 = 0.2;

/// Callback receiving jobs promoted from the wait queue.
pub type AdmitFn<P> = Arc<dyn Fn(Job<P>) + Send + Sync>;

/// A job holding a slot.
#[derive(Debug, Clone)]
struct ActiveSlot {
    meta: JobMetadata,
    admitted_at_ms: u64,
    deadline_ms: Option<u64>,
}

struct SchedulerState<P> {
    active: HashMap<JobId, ActiveSlot>,
    queue: WaitQueue<P>,
    breaker: CircuitBreaker,
    observed_duration_ms: Option<f64>,
}

/// Admission scheduler for one pool of execution slots.
pub struct AdmissionScheduler<P> {
    name: String,
    config: PoolConfig,
    reserved_slots: usize,
    state: Mutex<SchedulerState<P>>,
    clock: Arc<dyn Clock>,
    on_admit: AdmitFn<P>,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
}

impl<P> AdmissionScheduler<P> {
    /// Create a scheduler. `on_admit` receives every job promoted from the
    /// queue; jobs admitted directly by [`submit`](Self::submit) are not
    /// passed to it.
    pub fn new<F>(config: PoolConfig, on_admit: F) -> Result<Self, SchedulerError>
    where
        F: Fn(Job<P>) + Send + Sync + 'static,
    {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        Ok(Self::from_validated(config, Arc::new(on_admit)))
    }

    /// Build from a configuration that has already passed validation.
    pub(crate) fn from_validated(config: PoolConfig, on_admit: AdmitFn<P>) -> Self {
        let reserved_slots = config.reserved_slots();
        let state = SchedulerState {
            active: HashMap::with_capacity(config.max_concurrent.min(1024)),
            queue: WaitQueue::new(config.max_queue_depth),
            breaker: CircuitBreaker::from_config(&config.breaker),
            observed_duration_ms: None,
        };
        Self {
            name: "default".into(),
            config,
            reserved_slots,
            state: Mutex::new(state),
            clock: Arc::new(SystemClock),
            on_admit,
            audit: None,
        }
    }

    /// Name used in logs and audit events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the scheduler was built with.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Build a job stamped with this scheduler's clock, so FIFO order and
    /// scheduling decisions share one time base.
    pub fn new_job(
        &self,
        priority: Priority,
        owner_id: impl Into<String>,
        subject_id: impl Into<String>,
        payload: P,
    ) -> Job<P> {
        Job::new(priority, owner_id, subject_id, payload).submitted_at(self.clock.now_ms())
    }

    /// Offer a job for admission. Never blocks.
    ///
    /// Returns [`AdmissionDecision::RunNow`] when the job now holds a slot and
    /// the caller should start it, or `Queued` with a position and wait
    /// estimate. While the breaker is open the configured fallback decides.
    pub fn submit(&self, job: Job<P>) -> Result<AdmissionDecision, SchedulerError> {
        let (result, promoted) = {
            let mut state = self.state.lock();
            let now = self.clock.now_ms();
            let id = job.id();
            if state.active.contains_key(&id) || state.queue.contains(id) {
                return Err(SchedulerError::DuplicateJob(id));
            }

            let promoted = self.admit_ready_locked(&mut state, now);
            let result = if state.breaker.is_open(now) {
                self.submit_while_open(&mut state, job, now)
            } else if self.can_admit(job.priority(), state.active.len()) {
                self.activate(&mut state, &job.meta, now, AuditAction::Start);
                tracing::info!(pool = %self.name, job_id = %id, priority = %job.priority(), "job admitted immediately");
                Ok(AdmissionDecision::RunNow)
            } else {
                let per_job_ms = self.average_duration_ms(&state);
                self.enqueue(&mut state, job).map(|index| AdmissionDecision::Queued {
                    position: index + 1,
                    estimated_wait_ms: Self::wait_through(&state, index, per_job_ms),
                })
            };
            (result, promoted)
        };
        self.dispatch(promoted);
        result
    }

    fn submit_while_open(
        &self,
        state: &mut SchedulerState<P>,
        job: Job<P>,
        now: u64,
    ) -> Result<AdmissionDecision, SchedulerError> {
        let recovery = state.breaker.recovery_time_ms();
        match self.config.breaker.fallback_strategy {
            FallbackStrategy::Reject => {
                self.reject(&job.meta, "breaker open");
                Err(SchedulerError::BreakerOpen)
            }
            FallbackStrategy::Degrade if job.priority() != Priority::Critical => {
                self.reject(&job.meta, "breaker open, degraded to critical only");
                Err(SchedulerError::BreakerOpen)
            }
            FallbackStrategy::Degrade if state.active.len() < self.config.max_concurrent => {
                self.activate(state, &job.meta, now, AuditAction::Start);
                tracing::info!(pool = %self.name, job_id = %job.id(), "critical job admitted while breaker open");
                Ok(AdmissionDecision::RunNow)
            }
            FallbackStrategy::Degrade | FallbackStrategy::Queue => {
                self.enqueue(state, job).map(|index| AdmissionDecision::Queued {
                    position: index + 1,
                    estimated_wait_ms: recovery,
                })
            }
        }
    }

    /// Release the slot held by `id`, feed the outcome to the breaker and
    /// admit as many queued jobs as now fit.
    ///
    /// The job owner must call this exactly once per admitted job. Returns
    /// [`SchedulerError::UnknownJob`] if the job holds no slot, including when
    /// it was already reclaimed.
    pub fn complete(&self, id: JobId, success: bool) -> Result<(), SchedulerError> {
        let promoted = {
            let mut state = self.state.lock();
            let now = self.clock.now_ms();
            let Some(slot) = state.active.remove(&id) else {
                tracing::warn!(pool = %self.name, job_id = %id, "completion for job without a slot");
                return Err(SchedulerError::UnknownJob(id));
            };

            if success {
                state.breaker.record_success();
                if self.config.adaptive_wait_estimate {
                    Self::observe_duration(&mut state, now.saturating_sub(slot.admitted_at_ms));
                }
            } else {
                state.breaker.record_failure(now);
            }
            let action = if success { AuditAction::Complete } else { AuditAction::Fail };
            self.record_audit(&slot.meta, action, None);
            tracing::info!(
                pool = %self.name,
                job_id = %id,
                success,
                held_ms = now.saturating_sub(slot.admitted_at_ms),
                "job released its slot"
            );

            self.admit_ready_locked(&mut state, now)
        };
        self.dispatch(promoted);
        Ok(())
    }

    /// Admit queued jobs that fit right now. Returns how many were promoted.
    ///
    /// Needed when the breaker recovers while no job is running, since no
    /// completion will arrive to drive the queue.
    pub fn admit_ready(&self) -> usize {
        let promoted = {
            let mut state = self.state.lock();
            let now = self.clock.now_ms();
            self.admit_ready_locked(&mut state, now)
        };
        let count = promoted.len();
        self.dispatch(promoted);
        count
    }

    /// Withdraw a queued job before it is admitted.
    pub fn cancel(&self, id: JobId) -> Result<Job<P>, SchedulerError> {
        let mut state = self.state.lock();
        let job = state
            .queue
            .remove(id)
            .ok_or(SchedulerError::UnknownJob(id))?;
        self.record_audit(&job.meta, AuditAction::Cancel, None);
        tracing::info!(pool = %self.name, job_id = %id, "queued job cancelled");
        Ok(job)
    }

    /// Reclaim slots whose deadline has passed.
    ///
    /// Each reclaimed job counts as a timeout failure for the breaker. Freed
    /// slots are then offered to the queue. Returns the reclaimed ids.
    pub fn reclaim_expired(&self) -> Vec<JobId> {
        self.reclaim_expired_then(|_| {})
    }

    /// Reclaim overdue slots, running `on_reclaimed` after the lock is
    /// released but before any promoted job is handed to the dispatch
    /// callback.
    pub(crate) fn reclaim_expired_then<F>(&self, on_reclaimed: F) -> Vec<JobId>
    where
        F: FnOnce(&[JobId]),
    {
        let (expired, promoted) = {
            let mut state = self.state.lock();
            let now = self.clock.now_ms();
            let expired: Vec<JobId> = state
                .active
                .iter()
                .filter(|(_, slot)| slot.deadline_ms.is_some_and(|d| now >= d))
                .map(|(id, _)| *id)
                .collect();

            for id in &expired {
                if let Some(slot) = state.active.remove(id) {
                    state.breaker.record_failure(now);
                    self.record_audit(&slot.meta, AuditAction::Reclaim, Some("TIMEOUT".into()));
                    tracing::warn!(
                        pool = %self.name,
                        job_id = %id,
                        held_ms = now.saturating_sub(slot.admitted_at_ms),
                        "reclaimed slot past its deadline"
                    );
                }
            }
            let promoted = if expired.is_empty() {
                Vec::new()
            } else {
                self.admit_ready_locked(&mut state, now)
            };
            (expired, promoted)
        };
        if !expired.is_empty() {
            on_reclaimed(&expired);
        }
        self.dispatch(promoted);
        expired
    }

    /// Current occupancy.
    pub fn load(&self) -> SchedulerSnapshot {
        let mut state = self.state.lock();
        let now = self.clock.now_ms();
        let active = state.active.len();
        #[allow(clippy::cast_precision_loss)]
        let utilization = active as f64 / self.config.max_concurrent as f64;
        SchedulerSnapshot {
            active,
            queued: state.queue.len(),
            max_concurrent: self.config.max_concurrent,
            utilization_pct: utilization * 100.0,
            saturated: utilization >= self.config.degrade_threshold,
            breaker_open: state.breaker.is_open(now),
            failure_count: state.breaker.failure_count(),
        }
    }

    /// Count a success against the breaker.
    pub fn record_success(&self) {
        self.state.lock().breaker.record_success();
    }

    /// Count a failure against the breaker.
    pub fn record_failure(&self) {
        let now = self.clock.now_ms();
        self.state.lock().breaker.record_failure(now);
    }

    /// Whether the breaker is open, applying lazy recovery.
    pub fn is_breaker_open(&self) -> bool {
        let now = self.clock.now_ms();
        self.state.lock().breaker.is_open(now)
    }

    /// Breaker state, applying lazy recovery.
    pub fn breaker_state(&self) -> BreakerState {
        let now = self.clock.now_ms();
        self.state.lock().breaker.state(now)
    }

    /// Breaker failure counter.
    pub fn failure_count(&self) -> u32 {
        self.state.lock().breaker.failure_count()
    }

    /// Whether `id` holds a slot.
    pub fn is_active(&self, id: JobId) -> bool {
        self.state.lock().active.contains_key(&id)
    }

    /// Whether `id` is waiting.
    pub fn is_queued(&self, id: JobId) -> bool {
        self.state.lock().queue.contains(id)
    }

    /// Queued ids in dequeue order.
    pub fn queued_ids(&self) -> Vec<JobId> {
        self.state.lock().queue.iter().map(Job::id).collect()
    }

    /// Check the wait queue ordering invariant.
    pub fn queue_is_sorted(&self) -> bool {
        self.state.lock().queue.is_sorted()
    }

    fn can_admit(&self, priority: Priority, active: usize) -> bool {
        (priority.is_elevated() && active < self.config.max_concurrent)
            || active < self.reserved_slots
    }

    fn activate(
        &self,
        state: &mut SchedulerState<P>,
        meta: &JobMetadata,
        now: u64,
        action: AuditAction,
    ) {
        let slot = ActiveSlot {
            meta: meta.clone(),
            admitted_at_ms: now,
            deadline_ms: self.config.slot_timeout_ms.map(|t| now.saturating_add(t)),
        };
        state.active.insert(meta.id, slot);
        self.record_audit(meta, action, None);
    }

    fn enqueue(&self, state: &mut SchedulerState<P>, job: Job<P>) -> Result<usize, SchedulerError> {
        let meta = job.meta.clone();
        match state.queue.push(job) {
            Ok(index) => {
                self.record_audit(&meta, AuditAction::Enqueue, None);
                tracing::info!(
                    pool = %self.name,
                    job_id = %meta.id,
                    priority = %meta.priority,
                    position = index + 1,
                    "job queued"
                );
                Ok(index)
            }
            Err(err) => {
                self.reject(&meta, "queue full");
                Err(err)
            }
        }
    }

    fn reject(&self, meta: &JobMetadata, reason: &str) {
        self.record_audit(meta, AuditAction::Reject, Some(reason.to_string()));
        tracing::warn!(pool = %self.name, job_id = %meta.id, reason, "job rejected");
    }

    /// Promote queue heads while they satisfy the admission rule. While the
    /// breaker is open only the degrade policy promotes, and only critical
    /// jobs.
    fn admit_ready_locked(&self, state: &mut SchedulerState<P>, now: u64) -> Vec<Job<P>> {
        let mut promoted = Vec::new();
        loop {
            let open = state.breaker.is_open(now);
            let Some(head) = state.queue.peek() else {
                break;
            };
            let active = state.active.len();
            let eligible = if open {
                self.config.breaker.fallback_strategy == FallbackStrategy::Degrade
                    && head.priority() == Priority::Critical
                    && active < self.config.max_concurrent
            } else {
                self.can_admit(head.priority(), active)
            };
            if !eligible {
                break;
            }
            let Some(job) = state.queue.pop_front() else {
                break;
            };
            self.activate(state, &job.meta, now, AuditAction::Wake);
            promoted.push(job);
        }
        promoted
    }

    fn dispatch(&self, promoted: Vec<Job<P>>) {
        for job in promoted {
            tracing::info!(pool = %self.name, job_id = %job.id(), "woke queued job");
            (self.on_admit)(job);
        }
    }

    /// Expected wait for the job at `index`: the run time of every queued job
    /// up to and including it, taking each job's own estimate when present.
    fn wait_through(state: &SchedulerState<P>, index: usize, per_job_ms: u64) -> u64 {
        state
            .queue
            .iter()
            .take(index + 1)
            .map(|job| job.meta.estimated_duration_ms.unwrap_or(per_job_ms))
            .fold(0, u64::saturating_add)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn average_duration_ms(&self, state: &SchedulerState<P>) -> u64 {
        match state.observed_duration_ms {
            Some(avg) if self.config.adaptive_wait_estimate => avg.round() as u64,
            _ => self.config.average_job_duration_ms,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn observe_duration(state: &mut SchedulerState<P>, duration_ms: u64) {
        let sample = duration_ms as f64;
        state.observed_duration_ms = Some(match state.observed_duration_ms {
            Some(avg) => avg + DURATION_EWMA_ALPHA * (sample - avg),
            None => sample,
        });
    }

    fn record_audit(&self, meta: &JobMetadata, action: AuditAction, detail: Option<String>) {
        if let Some(audit) = &self.audit {
            audit.lock().record(build_audit_event(
                meta.id,
                self.name.clone(),
                meta.owner_id.clone(),
                meta.priority,
                action,
                detail,
            ));
        }
    }
}
