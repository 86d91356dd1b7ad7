//! Pool, breaker, and retry configuration structures.
//!
//! Values are read once when a pool is built; nothing here is re-read at
//! runtime. Every loader validates before returning.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable prefix used by [`PoolConfig::from_env`].
pub const ENV_PREFIX: &str = "ADMISSION_";

/// Admission policy applied while the circuit breaker is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Enqueue as normal and report the recovery window as the wait.
    #[default]
    Queue,
    /// Refuse every submission.
    Reject,
    /// Admit only critical work; refuse everything else.
    Degrade,
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queue => "queue",
            Self::Reject => "reject",
            Self::Degrade => "degrade",
        };
        f.write_str(name)
    }
}

impl FromStr for FallbackStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "reject" => Ok(Self::Reject),
            "degrade" => Ok(Self::Degrade),
            other => Err(format!("unknown fallback strategy `{other}`")),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures (net of successes) that open the breaker.
    pub failure_threshold: u32,
    /// Quiet period after the last failure before the breaker closes again.
    pub recovery_time_ms: u64,
    /// Policy for submissions while open.
    pub fallback_strategy: FallbackStrategy,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_time_ms: 60_000,
            fallback_strategy: FallbackStrategy::Queue,
        }
    }
}

impl BreakerConfig {
    /// Validate breaker values.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".into());
        }
        Ok(())
    }
}

/// Retry and backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay_ms: u64,
    /// Upper bound on the exponential component.
    pub max_delay_ms: u64,
    /// Growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Upper bound of the additive uniform jitter.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::interactive()
    }
}

impl RetryConfig {
    /// Short-request profile: 10s cap, 100ms jitter.
    #[must_use]
    pub const fn interactive() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_ms: 100,
        }
    }

    /// Long-running generation profile: 30s cap, 1s jitter.
    #[must_use]
    pub const fn batch() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ms: 1_000,
        }
    }

    /// Override the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Override the jitter bound.
    #[must_use]
    pub const fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    /// Validate retry values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".into());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be a finite value >= 1".into());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err("base_delay_ms must not exceed max_delay_ms".into());
        }
        Ok(())
    }
}

/// Admission pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Hard cap on concurrently running jobs.
    pub max_concurrent: usize,
    /// Share of `max_concurrent` open to normal and low priority work.
    pub reserved_fraction: f64,
    /// Utilisation fraction at which the pool reports itself saturated.
    pub degrade_threshold: f64,
    /// Per-position wait used to estimate queue delay.
    pub average_job_duration_ms: u64,
    /// Replace the fixed duration with a rolling average of observed runs.
    pub adaptive_wait_estimate: bool,
    /// Optional bound on queued jobs.
    pub max_queue_depth: Option<usize>,
    /// Optional deadline after which an active slot is reclaimed.
    pub slot_timeout_ms: Option<u64>,
    /// Circuit breaker settings.
    pub breaker: BreakerConfig,
    /// Retry settings.
    pub retry: RetryConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            reserved_fraction: 0.7,
            degrade_threshold: 0.9,
            average_job_duration_ms: 30_000,
            adaptive_wait_estimate: false,
            max_queue_depth: None,
            slot_timeout_ms: None,
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Slots open to normal and low priority work: `floor(max * fraction)`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn reserved_slots(&self) -> usize {
        (self.max_concurrent as f64 * self.reserved_fraction).floor() as usize
    }

    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".into());
        }
        if !(0.0..=1.0).contains(&self.reserved_fraction) {
            return Err("reserved_fraction must be within [0, 1]".into());
        }
        if !(0.0..=1.0).contains(&self.degrade_threshold) {
            return Err("degrade_threshold must be within [0, 1]".into());
        }
        if self.max_queue_depth == Some(0) {
            return Err("max_queue_depth must be greater than 0 when set".into());
        }
        if self.slot_timeout_ms == Some(0) {
            return Err("slot_timeout_ms must be greater than 0 when set".into());
        }
        self.breaker.validate()?;
        self.retry.validate()?;
        Ok(())
    }

    /// Parse a pool configuration from JSON and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load defaults overridden by `ADMISSION_*` variables, reading `.env` first.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is fine; real environment variables still apply.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load defaults overridden by values from `lookup`, keyed by full variable name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        if let Some(v) = get("MAX_CONCURRENT") {
            cfg.max_concurrent = parse_var("MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = get("RESERVED_FRACTION") {
            cfg.reserved_fraction = parse_var("RESERVED_FRACTION", &v)?;
        }
        if let Some(v) = get("DEGRADE_THRESHOLD") {
            cfg.degrade_threshold = parse_var("DEGRADE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("AVERAGE_JOB_DURATION_MS") {
            cfg.average_job_duration_ms = parse_var("AVERAGE_JOB_DURATION_MS", &v)?;
        }
        if let Some(v) = get("ADAPTIVE_WAIT_ESTIMATE") {
            cfg.adaptive_wait_estimate = parse_var("ADAPTIVE_WAIT_ESTIMATE", &v)?;
        }
        if let Some(v) = get("MAX_QUEUE_DEPTH") {
            cfg.max_queue_depth = Some(parse_var("MAX_QUEUE_DEPTH", &v)?);
        }
        if let Some(v) = get("SLOT_TIMEOUT_MS") {
            cfg.slot_timeout_ms = Some(parse_var("SLOT_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("FAILURE_THRESHOLD") {
            cfg.breaker.failure_threshold = parse_var("FAILURE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("RECOVERY_TIME_MS") {
            cfg.breaker.recovery_time_ms = parse_var("RECOVERY_TIME_MS", &v)?;
        }
        if let Some(v) = get("FALLBACK_STRATEGY") {
            cfg.breaker.fallback_strategy = v.parse()?;
        }
        if let Some(v) = get("MAX_ATTEMPTS") {
            cfg.retry.max_attempts = parse_var("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("BASE_DELAY_MS") {
            cfg.retry.base_delay_ms = parse_var("BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = get("MAX_DELAY_MS") {
            cfg.retry.max_delay_ms = parse_var("MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = get("BACKOFF_MULTIPLIER") {
            cfg.retry.backoff_multiplier = parse_var("BACKOFF_MULTIPLIER", &v)?;
        }
        if let Some(v) = get("JITTER_MS") {
            cfg.retry.jitter_ms = parse_var("JITTER_MS", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{name}: {e}"))
}

/// Root configuration: one admission pool per named backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, PoolConfig>,
}

impl SchedulerConfig {
    /// Validate all pools and ensure at least one pool exists.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.max_concurrent, 5);
        assert!((cfg.reserved_fraction - 0.7).abs() < f64::EPSILON);
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(cfg.breaker.recovery_time_ms, 60_000);
        assert_eq!(cfg.breaker.fallback_strategy, FallbackStrategy::Queue);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay_ms, 1_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn reserved_slots_floor() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.reserved_slots(), 3);

        let cfg = PoolConfig {
            max_concurrent: 4,
            reserved_fraction: 0.5,
            ..PoolConfig::default()
        };
        assert_eq!(cfg.reserved_slots(), 2);
    }

    #[test]
    fn lookup_overrides_defaults() {
        let cfg = PoolConfig::from_lookup(|key| match key {
            "ADMISSION_MAX_CONCURRENT" => Some("8".into()),
            "ADMISSION_FALLBACK_STRATEGY" => Some("Degrade".into()),
            "ADMISSION_JITTER_MS" => Some("0".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.max_concurrent, 8);
        assert_eq!(cfg.breaker.fallback_strategy, FallbackStrategy::Degrade);
        assert_eq!(cfg.retry.jitter_ms, 0);
    }

    #[test]
    fn lookup_rejects_garbage() {
        let err = PoolConfig::from_lookup(|key| {
            (key == "ADMISSION_MAX_ATTEMPTS").then(|| "three".to_string())
        })
        .unwrap_err();
        assert!(err.contains("ADMISSION_MAX_ATTEMPTS"));
    }
}
