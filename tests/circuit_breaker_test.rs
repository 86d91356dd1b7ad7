//! Integration tests for breaker state and fallback admission policies.

use std::sync::Arc;

use parking_lot::Mutex;
use prometheus_admission::config::{BreakerConfig, FallbackStrategy, PoolConfig};
use prometheus_admission::core::{
    AdmissionScheduler, AuditAction, BreakerState, InMemoryAuditSink, Job, SchedulerError,
};
use prometheus_admission::util::{JobId, ManualClock, Priority};

fn config(strategy: FallbackStrategy) -> PoolConfig {
    PoolConfig {
        breaker: BreakerConfig {
            failure_threshold: 5,
            recovery_time_ms: 60_000,
            fallback_strategy: strategy,
        },
        ..PoolConfig::default()
    }
}

fn scheduler(
    strategy: FallbackStrategy,
) -> (AdmissionScheduler<()>, Arc<ManualClock>, Arc<Mutex<Vec<JobId>>>) {
    let clock = Arc::new(ManualClock::new(100_000));
    let woken = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&woken);
    let s = AdmissionScheduler::new(config(strategy), move |job: Job<()>| sink.lock().push(job.id()))
        .unwrap()
        .with_clock(clock.clone());
    (s, clock, woken)
}

fn job(priority: Priority) -> Job<()> {
    Job::new(priority, "owner", "subject", ())
}

fn trip(s: &AdmissionScheduler<()>) {
    for _ in 0..5 {
        s.record_failure();
    }
}

#[test]
fn test_opens_after_threshold_and_recovers_lazily() {
    let (s, clock, _) = scheduler(FallbackStrategy::Queue);
    for _ in 0..4 {
        s.record_failure();
    }
    assert!(!s.is_breaker_open());
    s.record_failure();
    assert!(s.is_breaker_open());
    assert_eq!(s.breaker_state(), BreakerState::Open);
    assert_eq!(s.failure_count(), 5);

    clock.advance(60_000);
    assert!(s.is_breaker_open(), "window must be strictly exceeded");
    clock.advance(1);
    assert!(!s.is_breaker_open());
    assert_eq!(s.failure_count(), 0);
}

#[test]
fn test_success_only_decrements() {
    let (s, _, _) = scheduler(FallbackStrategy::Queue);
    for _ in 0..4 {
        s.record_failure();
    }
    s.record_success();
    assert_eq!(s.failure_count(), 3);
    s.record_failure();
    s.record_failure();
    assert!(s.is_breaker_open());
}

#[test]
fn test_reject_strategy_refuses_without_enqueue() {
    let (s, _, _) = scheduler(FallbackStrategy::Reject);
    trip(&s);
    let err = s.submit(job(Priority::Critical)).unwrap_err();
    assert!(matches!(err, SchedulerError::BreakerOpen));
    assert!(err.attempts().is_none());
    assert_eq!(s.load().queued, 0);
    assert_eq!(s.load().active, 0);
}

#[test]
fn test_queue_strategy_reports_recovery_wait() {
    let (s, _, _) = scheduler(FallbackStrategy::Queue);
    trip(&s);
    let decision = s.submit(job(Priority::High)).unwrap();
    assert!(!decision.run_now());
    assert_eq!(decision.estimated_wait_ms(), Some(60_000));
    assert_eq!(decision.queue_position(), Some(1));
    assert_eq!(s.load().queued, 1);
}

#[test]
fn test_degrade_strategy_admits_only_critical() {
    let (s, _, _) = scheduler(FallbackStrategy::Degrade);
    trip(&s);
    assert!(matches!(s.submit(job(Priority::High)), Err(SchedulerError::BreakerOpen)));
    assert!(matches!(s.submit(job(Priority::Low)), Err(SchedulerError::BreakerOpen)));
    assert!(s.submit(job(Priority::Critical)).unwrap().run_now());
    assert_eq!(s.load().active, 1);
}

#[test]
fn test_degrade_queues_critical_when_full() {
    let (s, _, woken) = scheduler(FallbackStrategy::Degrade);
    let running: Vec<_> = (0..5).map(|_| job(Priority::High)).collect();
    let first = running[0].id();
    for j in running {
        assert!(s.submit(j).unwrap().run_now());
    }
    trip(&s);

    let critical = job(Priority::Critical);
    let critical_id = critical.id();
    let decision = s.submit(critical).unwrap();
    assert_eq!(decision.queue_position(), Some(1));

    s.complete(first, true).unwrap();
    assert_eq!(woken.lock().as_slice(), &[critical_id]);
}

#[test]
fn test_open_breaker_holds_queue_until_recovery() {
    let (s, clock, woken) = scheduler(FallbackStrategy::Queue);
    trip(&s);
    let waiting = job(Priority::Normal);
    let waiting_id = waiting.id();
    s.submit(waiting).unwrap();

    assert_eq!(s.admit_ready(), 0);
    clock.advance(60_001);
    assert_eq!(s.admit_ready(), 1);
    assert_eq!(woken.lock().as_slice(), &[waiting_id]);
    assert!(s.is_active(waiting_id));
}

#[test]
fn test_failed_completions_feed_breaker() {
    let (s, _, _) = scheduler(FallbackStrategy::Reject);
    let sink = Arc::new(Mutex::new(InMemoryAuditSink::new(64)));
    let s = s.with_audit(Box::new(Arc::clone(&sink)));

    for _ in 0..5 {
        let j = job(Priority::High);
        let id = j.id();
        assert!(s.submit(j).unwrap().run_now());
        s.complete(id, false).unwrap();
    }
    assert!(s.is_breaker_open());
    assert!(s.submit(job(Priority::High)).is_err());

    let sink = sink.lock();
    assert_eq!(sink.total(AuditAction::Fail), 5);
    assert_eq!(sink.events_for(AuditAction::Start).len(), 5);
    let actions: Vec<_> = sink.events().iter().map(|e| e.action).collect();
    assert_eq!(actions.last(), Some(&AuditAction::Reject));
}

#[test]
fn test_slot_deadline_reclaims_and_counts_timeout() {
    let clock = Arc::new(ManualClock::new(0));
    let cfg = PoolConfig {
        max_concurrent: 1,
        reserved_fraction: 1.0,
        slot_timeout_ms: Some(5_000),
        ..PoolConfig::default()
    };
    let woken = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&woken);
    let s = AdmissionScheduler::new(cfg, move |job: Job<()>| sink.lock().push(job.id()))
        .unwrap()
        .with_clock(clock.clone());

    let stuck = job(Priority::Normal);
    let stuck_id = stuck.id();
    let next = job(Priority::Normal);
    let next_id = next.id();
    s.submit(stuck).unwrap();
    s.submit(next).unwrap();

    clock.advance(4_999);
    assert!(s.reclaim_expired().is_empty());
    clock.advance(1);
    assert_eq!(s.reclaim_expired(), vec![stuck_id]);
    assert_eq!(s.failure_count(), 1);
    assert_eq!(woken.lock().as_slice(), &[next_id]);

    // Late completion after reclaim is refused
    assert!(matches!(
        s.complete(stuck_id, true),
        Err(SchedulerError::UnknownJob(_))
    ));
}
