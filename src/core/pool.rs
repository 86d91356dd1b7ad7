//! Admission pool: the full per-job pipeline.
//!
//! `submit` asks the scheduler for a slot. Admitted jobs, whether admitted
//! at once or promoted from the queue later, are spawned and run under the
//! retry coordinator. When a job finishes the pool reports the outcome back to
//! the scheduler, which feeds the breaker and promotes waiting work. Callers
//! await the terminal result through a [`JobHandle`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::config::PoolConfig;
use crate::core::audit::AuditSink;
use crate::core::executor::{JobExecutor, Spawn};
use crate::core::job::{AdmissionDecision, Job, SchedulerSnapshot};
use crate::core::retry::{RetryCoordinator, RetryOutcome, Sleeper, TokioSleeper};
use crate::core::scheduler::AdmissionScheduler;
use crate::core::SchedulerError;
use crate::util::clock::{Clock, SystemClock};
use crate::util::serde::{JobId, Priority};

/// Terminal result delivered to a [`JobHandle`].
pub type JobResult<T> = Result<RetryOutcome<T>, SchedulerError>;

/// Optional collaborators for an [`AdmissionPool`].
pub struct PoolOptions {
    /// Name used in logs and audit events.
    pub name: String,
    /// Time source for the scheduler, breaker and retry stamps.
    pub clock: Arc<dyn Clock>,
    /// Suspension primitive for retry backoff.
    pub sleeper: Arc<dyn Sleeper>,
    /// Audit sink for admission decisions.
    pub audit: Option<Box<dyn AuditSink>>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            name: "default".into(),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            audit: None,
        }
    }
}

impl PoolOptions {
    /// Options with the given pool name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Caller's view of a submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    id: JobId,
    decision: AdmissionDecision,
    rx: oneshot::Receiver<JobResult<T>>,
}

impl<T> JobHandle<T> {
    /// Job identifier.
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Admission decision made at submission.
    pub const fn decision(&self) -> AdmissionDecision {
        self.decision
    }

    /// Wait for the terminal result.
    pub async fn wait(self) -> JobResult<T> {
        let id = self.id;
        self.rx
            .await
            .map_err(|_| SchedulerError::Backend(format!("job {id} dropped before completion")))?
    }
}

struct PoolInner<P, T, E, S> {
    scheduler: AdmissionScheduler<P>,
    retry: RetryCoordinator,
    executor: E,
    spawner: S,
    waiters: Mutex<HashMap<JobId, oneshot::Sender<JobResult<T>>>>,
    /// Abort signals for executions in flight, keyed by job.
    running: Mutex<HashMap<JobId, oneshot::Sender<()>>>,
}

/// Scheduler, breaker, retry and executor composed into one handle.
pub struct AdmissionPool<P, T, E, S> {
    inner: Arc<PoolInner<P, T, E, S>>,
}

impl<P, T, E, S> Clone for AdmissionPool<P, T, E, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, T, E, S> AdmissionPool<P, T, E, S>
where
    P: Clone + Send + Sync + 'static,
    T: Send + 'static,
    E: JobExecutor<P, T>,
    S: Spawn,
{
    /// Create a pool with default options.
    pub fn new(config: PoolConfig, executor: E, spawner: S) -> Result<Self, SchedulerError> {
        Self::with_options(config, executor, spawner, PoolOptions::default())
    }

    /// Create a pool with explicit collaborators.
    pub fn with_options(
        config: PoolConfig,
        executor: E,
        spawner: S,
        options: PoolOptions,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let PoolOptions {
            name,
            clock,
            sleeper,
            audit,
        } = options;
        let retry = RetryCoordinator::new(config.retry.clone())
            .with_sleeper(sleeper)
            .with_clock(Arc::clone(&clock));

        let inner = Arc::new_cyclic(|weak: &Weak<PoolInner<P, T, E, S>>| {
            let weak = weak.clone();
            let on_admit = Arc::new(move |job: Job<P>| {
                if let Some(inner) = weak.upgrade() {
                    PoolInner::run(&inner, job);
                }
            });
            let mut scheduler = AdmissionScheduler::from_validated(config, on_admit)
                .with_name(name)
                .with_clock(clock);
            if let Some(audit) = audit {
                scheduler = scheduler.with_audit(audit);
            }
            PoolInner {
                scheduler,
                retry,
                executor,
                spawner,
                waiters: Mutex::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
            }
        });

        tracing::info!(pool = %inner.scheduler.name(), "admission pool created");
        Ok(Self { inner })
    }

    /// Submit a job. Returns immediately with a handle; refusals surface as
    /// errors here, execution failures through [`JobHandle::wait`].
    pub fn submit(&self, job: Job<P>) -> Result<JobHandle<T>, SchedulerError> {
        let id = job.id();
        let (tx, rx) = oneshot::channel();
        match self.inner.waiters.lock().entry(id) {
            Entry::Occupied(_) => return Err(SchedulerError::DuplicateJob(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        let decision = match self.inner.scheduler.submit(job.clone()) {
            Ok(decision) => decision,
            Err(err) => {
                self.inner.waiters.lock().remove(&id);
                return Err(err);
            }
        };
        if decision.run_now() {
            PoolInner::run(&self.inner, job);
        }
        Ok(JobHandle { id, decision, rx })
    }

    /// Withdraw a queued job; its handle resolves with `Cancelled`.
    pub fn cancel(&self, id: JobId) -> Result<(), SchedulerError> {
        self.inner.scheduler.cancel(id)?;
        self.inner.resolve(id, Err(SchedulerError::Cancelled(id)));
        Ok(())
    }

    /// Build a job stamped with the pool's clock.
    pub fn new_job(
        &self,
        priority: Priority,
        owner_id: impl Into<String>,
        subject_id: impl Into<String>,
        payload: P,
    ) -> Job<P> {
        self.inner.scheduler.new_job(priority, owner_id, subject_id, payload)
    }

    /// Reclaim overdue slots; their handles resolve with `SlotExpired` and
    /// their executions are stopped before the freed slots are reused.
    pub fn reclaim_expired(&self) -> Vec<JobId> {
        self.inner.reclaim_expired()
    }

    /// Admit queued jobs that fit now.
    pub fn admit_ready(&self) -> usize {
        self.inner.scheduler.admit_ready()
    }

    /// Current occupancy.
    pub fn load(&self) -> SchedulerSnapshot {
        self.inner.scheduler.load()
    }

    /// Underlying scheduler.
    pub fn scheduler(&self) -> &AdmissionScheduler<P> {
        &self.inner.scheduler
    }

    /// Spawn a periodic task that reclaims overdue slots and pumps the queue.
    /// It stops once every handle to the pool has been dropped.
    pub fn spawn_maintenance(&self, every: Duration) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.spawner.spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    tracing::debug!("admission pool dropped, maintenance stopping");
                    break;
                };
                inner.reclaim_expired();
                inner.scheduler.admit_ready();
            }
        });
    }
}

impl<P, T, E, S> PoolInner<P, T, E, S>
where
    P: Clone + Send + Sync + 'static,
    T: Send + 'static,
    E: JobExecutor<P, T>,
    S: Spawn,
{
    /// Execute an admitted job on the spawner. The execution is dropped as
    /// soon as its slot is reclaimed.
    fn run(this: &Arc<Self>, job: Job<P>) {
        let inner = Arc::clone(this);
        let (abort_tx, mut abort_rx) = oneshot::channel();
        this.running.lock().insert(job.id(), abort_tx);
        this.spawner.spawn(async move {
            let Job { meta, payload } = job;
            let id = meta.id;
            tracing::debug!(job_id = %id, "executing job");

            let executor = &inner.executor;
            let result = tokio::select! {
                biased;
                _ = &mut abort_rx => {
                    tracing::warn!(job_id = %id, "execution aborted after its slot was reclaimed");
                    return;
                }
                result = inner
                    .retry
                    .execute(|| executor.execute(payload.clone(), meta.clone())) => result,
            };
            inner.running.lock().remove(&id);

            match inner.scheduler.complete(id, result.is_ok()) {
                Ok(()) => inner.resolve(id, result.map_err(SchedulerError::from)),
                Err(err) => {
                    tracing::warn!(job_id = %id, "finished after losing its slot: {}", err);
                }
            }
        });
    }

    fn reclaim_expired(&self) -> Vec<JobId> {
        let expired = self.scheduler.reclaim_expired_then(|ids| {
            let mut running = self.running.lock();
            for id in ids {
                if let Some(abort) = running.remove(id) {
                    let _ = abort.send(());
                }
            }
        });
        for id in &expired {
            self.resolve(*id, Err(SchedulerError::SlotExpired(*id)));
        }
        expired
    }

    fn resolve(&self, id: JobId, result: JobResult<T>) {
        let Some(tx) = self.waiters.lock().remove(&id) else {
            return;
        };
        if tx.send(result).is_err() {
            tracing::debug!(job_id = %id, "job handle dropped before result delivery");
        }
    }
}
