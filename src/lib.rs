//! # Prometheus Admission
//!
//! Admission control and resilience for compute-heavy model invocations.
//!
//! Model calls are scarce: a bounded number of execution slots, providers that
//! throttle or fall over, and requests that are expensive to repeat. This crate
//! decides which calls run, which wait, and what happens when they fail.
//!
//! ## Components
//!
//! - **`AdmissionScheduler`**: admits jobs by priority against a slot limit and
//!   a reserved slice, queueing the rest in (priority, submission) order.
//! - **`CircuitBreaker`**: counts failures and restricts admission once a
//!   threshold is reached, recovering lazily after a quiet window.
//! - **`classify`**: maps a raw failure onto a fixed taxonomy with a
//!   retryability flag and an optional delay hint.
//! - **`RetryCoordinator`**: retries classified-retryable failures with capped
//!   exponential backoff plus additive jitter.
//! - **`AdmissionPool`**: composes the above with an executor and a spawner.
//!
//! ## Example
//!
//! ```rust,ignore
//! use prometheus_admission::config::PoolConfig;
//! use prometheus_admission::core::{AdmissionPool, Job};
//! use prometheus_admission::runtime::TokioSpawner;
//! use prometheus_admission::util::Priority;
//!
//! let pool = AdmissionPool::new(PoolConfig::from_env()?, executor, TokioSpawner::current()?)?;
//! pool.spawn_maintenance(std::time::Duration::from_secs(1));
//!
//! let handle = pool.submit(Job::new(Priority::High, "user-1", "doc-9", prompt))?;
//! let outcome = handle.wait().await?;
//! println!("{} after {} attempt(s)", outcome.value, outcome.attempts);
//! ```
//!
//! The scheduler can also be driven directly: `submit` returns a decision,
//! the caller runs admitted jobs and reports back with `complete`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling, breaker, classification, and retry components.
pub mod core;
/// Configuration models for pools, breakers, and retry policy.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Runtime adapters.
pub mod runtime;
/// Shared utilities.
pub mod util;
