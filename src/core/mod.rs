//! Core admission, breaker, classification, and retry components.

pub mod audit;
pub mod breaker;
pub mod classifier;
pub mod error;
pub mod executor;
pub mod job;
pub mod pool;
pub mod retry;
pub mod scheduler;
pub mod wait_queue;

pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use breaker::{BreakerState, CircuitBreaker};
pub use classifier::{classify, ClassifiedError, ErrorKind, RawFailure, DEFAULT_RATE_LIMIT_DELAY_MS};
pub use error::{AppResult, SchedulerError};
pub use executor::{JobExecutor, Spawn};
pub use job::{AdmissionDecision, Job, JobMetadata, SchedulerSnapshot};
pub use pool::{AdmissionPool, JobHandle, JobResult, PoolOptions};
pub use retry::{
    RecordingSleeper, RetryAttempt, RetryCoordinator, RetryError, RetryOutcome, Sleeper,
    TokioSleeper,
};
pub use scheduler::{AdmissionScheduler, AdmitFn};
pub use wait_queue::WaitQueue;
