//! Configuration loading and validation tests.

use std::collections::HashMap;

use anyhow::Context;
use prometheus_admission::config::{FallbackStrategy, PoolConfig, RetryConfig, SchedulerConfig};
use prometheus_admission::core::{AdmissionScheduler, AppResult, SchedulerError};

fn load_pool(json: &str) -> AppResult<PoolConfig> {
    PoolConfig::from_json_str(json)
        .map_err(anyhow::Error::msg)
        .context("loading pool configuration")
}

#[test]
fn test_partial_json_keeps_defaults() -> AppResult<()> {
    let cfg = load_pool(
        r#"{
            "max_concurrent": 10,
            "breaker": { "fallback_strategy": "degrade" },
            "retry": { "max_attempts": 5 }
        }"#,
    )?;

    assert_eq!(cfg.max_concurrent, 10);
    assert_eq!(cfg.reserved_slots(), 7);
    assert_eq!(cfg.breaker.fallback_strategy, FallbackStrategy::Degrade);
    assert_eq!(cfg.breaker.failure_threshold, 5);
    assert_eq!(cfg.breaker.recovery_time_ms, 60_000);
    assert_eq!(cfg.retry.max_attempts, 5);
    assert_eq!(cfg.retry.max_delay_ms, 10_000);
    assert_eq!(cfg.retry.jitter_ms, 100);
    assert_eq!(cfg.max_queue_depth, None);
    assert_eq!(cfg.slot_timeout_ms, None);
    Ok(())
}

#[test]
fn test_invalid_json_is_rejected_with_context() {
    let err = load_pool(r#"{ "reserved_fraction": 1.5 }"#).unwrap_err();
    assert_eq!(err.to_string(), "loading pool configuration");
    assert!(format!("{err:#}").contains("reserved_fraction must be within [0, 1]"));

    let err = PoolConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error:"));

    let err = PoolConfig::from_json_str(r#"{ "breaker": { "fallback_strategy": "panic" } }"#)
        .unwrap_err();
    assert!(err.starts_with("parse error:"));
}

#[test]
fn test_retry_profiles() {
    let interactive = RetryConfig::interactive();
    assert_eq!(interactive.max_delay_ms, 10_000);
    assert_eq!(interactive.jitter_ms, 100);

    let batch = RetryConfig::batch();
    assert_eq!(batch.max_attempts, 3);
    assert_eq!(batch.base_delay_ms, 1_000);
    assert_eq!(batch.max_delay_ms, 30_000);
    assert_eq!(batch.jitter_ms, 1_000);
    assert!((batch.backoff_multiplier - 2.0).abs() < f64::EPSILON);

    let broken = RetryConfig {
        backoff_multiplier: 0.5,
        ..RetryConfig::interactive()
    };
    assert!(broken.validate().is_err());
}

#[test]
fn test_scheduler_config_names_failing_pool() {
    let err = SchedulerConfig::from_json_str(
        r#"{ "pools": { "chat": { "max_concurrent": 0 } } }"#,
    )
    .unwrap_err();
    assert_eq!(err, "pool `chat` invalid: max_concurrent must be greater than 0");

    let empty = SchedulerConfig {
        pools: HashMap::new(),
    };
    assert_eq!(
        empty.validate().unwrap_err(),
        "at least one pool must be defined"
    );
}

#[test]
fn test_env_lookup_overrides() {
    let vars: HashMap<&str, &str> = [
        ("ADMISSION_MAX_CONCURRENT", "12"),
        ("ADMISSION_RESERVED_FRACTION", "0.5"),
        ("ADMISSION_SLOT_TIMEOUT_MS", "120000"),
        ("ADMISSION_RECOVERY_TIME_MS", "5000"),
        ("ADMISSION_FALLBACK_STRATEGY", " reject "),
    ]
    .into_iter()
    .collect();

    let cfg = PoolConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).unwrap();
    assert_eq!(cfg.max_concurrent, 12);
    assert_eq!(cfg.reserved_slots(), 6);
    assert_eq!(cfg.slot_timeout_ms, Some(120_000));
    assert_eq!(cfg.breaker.recovery_time_ms, 5_000);
    assert_eq!(cfg.breaker.fallback_strategy, FallbackStrategy::Reject);
}

#[test]
fn test_env_lookup_reports_bad_values() {
    let err = PoolConfig::from_lookup(|key| {
        (key == "ADMISSION_MAX_ATTEMPTS").then(|| "three".to_string())
    })
    .unwrap_err();
    assert!(err.starts_with("ADMISSION_MAX_ATTEMPTS:"));

    let err = PoolConfig::from_lookup(|key| {
        (key == "ADMISSION_FALLBACK_STRATEGY").then(|| "retry".to_string())
    })
    .unwrap_err();
    assert_eq!(err, "unknown fallback strategy `retry`");
}

#[test]
fn test_scheduler_refuses_invalid_config() {
    let cfg = PoolConfig {
        max_queue_depth: Some(0),
        ..PoolConfig::default()
    };
    let err = AdmissionScheduler::<()>::new(cfg, |_| {}).err().unwrap();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    assert_eq!(
        err.to_string(),
        "invalid configuration: max_queue_depth must be greater than 0 when set"
    );
}

#[test]
fn test_config_serializes_with_snake_case_strategy() {
    let json = serde_json::to_value(PoolConfig::default()).unwrap();
    assert_eq!(json["breaker"]["fallback_strategy"], "queue");
    assert_eq!(json["max_concurrent"], 5);
}
