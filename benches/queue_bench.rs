//! Benchmarks for the admission scheduler.
//!
//! Benchmarks cover:
//! - Wait queue insertion and draining under mixed priorities
//! - Scheduler submit/complete cycles with cascading promotion
//! - Error classification
//! - End-to-end pool throughput

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use prometheus_admission::config::{BreakerConfig, PoolConfig};
use prometheus_admission::core::{
    classify, AdmissionPool, AdmissionScheduler, Job, JobExecutor, JobMetadata, PoolOptions,
    RawFailure, RecordingSleeper, Spawn, WaitQueue,
};
use prometheus_admission::util::Priority;

use async_trait::async_trait;
use tokio::runtime::Runtime;

// ============================================================================
// Test Payload and Executor
// ============================================================================

#[derive(Debug, Clone)]
struct BenchPayload {
    id: u64,
}

#[derive(Clone)]
struct BenchExecutor;

#[async_trait]
impl JobExecutor<BenchPayload, String> for BenchExecutor {
    async fn execute(&self, payload: BenchPayload, _meta: JobMetadata) -> Result<String, RawFailure> {
        // Every tenth job fails terminally and goes through the breaker
        if payload.id % 10 == 0 {
            return Err(RawFailure::with_status(400, "rejected"));
        }
        Ok(format!("result-{}", payload.id))
    }
}

#[derive(Clone)]
struct TokioSpawn;

impl Spawn for TokioSpawn {
    fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(fut);
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn mixed_priority(i: u64) -> Priority {
    match i % 4 {
        0 => Priority::Critical,
        1 => Priority::High,
        2 => Priority::Normal,
        _ => Priority::Low,
    }
}

fn build_job(i: u64) -> Job<BenchPayload> {
    Job::new(
        mixed_priority(i),
        format!("user-{}", i % 10),
        "bench-doc",
        BenchPayload { id: i },
    )
    .submitted_at(i)
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_wait_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("wait_queue_push_pop");

    for size in [100u64, 1_000, 5_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut q = WaitQueue::new(None);
                for i in 0..size {
                    q.push(build_job(i)).unwrap();
                }
                while let Some(job) = q.pop_front() {
                    black_box(job);
                }
            });
        });
    }
    group.finish();
}

fn bench_wait_queue_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("wait_queue_cancel");

    for size in [100u64, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut q = WaitQueue::new(None);
                let mut ids = Vec::new();
                for i in 0..size {
                    let job = build_job(i);
                    ids.push(job.id());
                    q.push(job).unwrap();
                }
                for id in ids.iter().step_by(2) {
                    black_box(q.remove(*id));
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_scheduler_submit_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_submit_complete");

    for task_count in [100u64, 1_000] {
        group.throughput(Throughput::Elements(task_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            &task_count,
            |b, &task_count| {
                b.iter(|| {
                    let config = PoolConfig {
                        max_concurrent: 10,
                        ..PoolConfig::default()
                    };
                    let promoted = Arc::new(parking_lot::Mutex::new(Vec::new()));
                    let sink = Arc::clone(&promoted);
                    let scheduler =
                        AdmissionScheduler::new(config, move |job: Job<BenchPayload>| {
                            sink.lock().push(job.id());
                        })
                        .unwrap();

                    let mut running = Vec::new();
                    for i in 0..task_count {
                        let job = build_job(i);
                        let id = job.id();
                        if scheduler.submit(job).unwrap().run_now() {
                            running.push(id);
                        }
                    }
                    // Drain: every completion may promote queued work
                    while let Some(id) = running.pop() {
                        scheduler.complete(id, true).unwrap();
                        running.append(&mut promoted.lock());
                    }
                    black_box(scheduler.load());
                });
            },
        );
    }
    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let failures = [
        RawFailure::with_status(429, "slow down"),
        RawFailure::with_status(503, "unavailable"),
        RawFailure::new("request timed out"),
        RawFailure::new("socket closed").code("ECONNRESET"),
        RawFailure::new("something odd"),
    ];

    c.bench_function("classify_mixed", |b| {
        b.iter(|| {
            for failure in &failures {
                black_box(classify(black_box(failure)));
            }
        });
    });
}

// ============================================================================
// End-to-End Scenario Benchmarks
// ============================================================================

fn bench_pool_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_end_to_end");

    group.bench_function("mixed_priority_workload", |b| {
        b.to_async(Runtime::new().unwrap()).iter(|| async {
            let config = PoolConfig {
                max_concurrent: 20,
                breaker: BreakerConfig {
                    failure_threshold: 1_000,
                    ..BreakerConfig::default()
                },
                ..PoolConfig::default()
            };
            let options = PoolOptions {
                sleeper: Arc::new(RecordingSleeper::new()),
                ..PoolOptions::named("bench")
            };
            let pool = AdmissionPool::with_options(config, BenchExecutor, TokioSpawn, options)
                .unwrap();

            let mut handles = Vec::with_capacity(150);
            for i in 0..150u64 {
                handles.push(pool.submit(build_job(i)).unwrap());
            }
            let results = futures::future::join_all(handles.into_iter().map(|h| h.wait())).await;
            black_box(results);
        });
    });
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(queue_benches, bench_wait_queue_push_pop, bench_wait_queue_cancel);

criterion_group!(scheduler_benches, bench_scheduler_submit_complete, bench_classify);

criterion_group!(scenario_benches, bench_pool_end_to_end);

criterion_main!(queue_benches, scheduler_benches, scenario_benches);
