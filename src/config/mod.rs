//! Configuration models for admission pools, breakers, and retry policy.

pub mod pool;

pub use pool::{BreakerConfig, FallbackStrategy, PoolConfig, RetryConfig, SchedulerConfig};
