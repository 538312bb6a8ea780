//! Tests for configuration validation

use std::time::Duration;

use roaring_offload::config::RuntimeConfig;

#[test]
fn test_default_config_is_valid() {
    let cfg = RuntimeConfig::new();
    assert!(cfg.validate().is_ok());
    assert!(cfg.worker_count >= 1);
    assert_eq!(cfg.drain_initial_backoff_us, 50);
    assert_eq!(cfg.drain_max_backoff_ms, 4);
    assert_eq!(cfg.drain_timeout_ms, None);
}

#[test]
fn test_zero_workers_rejected() {
    assert!(RuntimeConfig::new().with_worker_count(0).validate().is_err());
}

#[test]
fn test_zero_queue_depth_rejected() {
    assert!(RuntimeConfig::new().with_max_queue_depth(0).validate().is_err());
}

#[test]
fn test_zero_parallelism_rejected() {
    assert!(RuntimeConfig::new().with_parallelism(0).validate().is_err());
}

#[test]
fn test_inverted_backoff_rejected() {
    let cfg = RuntimeConfig {
        drain_initial_backoff_us: 10_000,
        drain_max_backoff_ms: 1,
        ..RuntimeConfig::new()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_drain_backoff_schedule() {
    let backoff = RuntimeConfig::new()
        .with_drain_timeout(Some(Duration::from_millis(250)))
        .drain_backoff();
    assert_eq!(backoff.initial, Duration::from_micros(50));
    assert_eq!(backoff.max, Duration::from_millis(4));
    assert_eq!(backoff.timeout, Some(Duration::from_millis(250)));
}

#[test]
fn test_json_overrides_defaults() {
    let cfg = RuntimeConfig::from_json_str(r#"{"worker_count": 3, "drain_timeout_ms": 500}"#).unwrap();
    assert_eq!(cfg.worker_count, 3);
    assert_eq!(cfg.drain_timeout_ms, Some(500));
    assert_eq!(cfg.max_queue_depth, RuntimeConfig::new().max_queue_depth);
}

#[test]
fn test_json_rejects_invalid_values() {
    assert!(RuntimeConfig::from_json_str(r#"{"worker_count": 0}"#).is_err());
    assert!(RuntimeConfig::from_json_str("not json").is_err());
}
