use std::collections::HashMap;
use std::time::Duration;

use super::types::{FullPolicy, SchedulerConfig};
use crate::error::ConfigError;
use crate::task::Priority;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults() {
    let cfg = SchedulerConfig::default();
    assert_eq!(cfg.worker_threads, 2);
    assert_eq!(cfg.queue_capacity, None);
    assert_eq!(cfg.full_policy, FullPolicy::Block);
    assert_eq!(cfg.tick_budget(), Duration::from_millis(15));
    assert_eq!(cfg.default_priority, Priority::DEFAULT);
    assert_eq!(cfg.condition_poll(), Duration::from_millis(20));
    assert_eq!(cfg.failure_history, 64);
    assert!(!cfg.synchronous);
    assert!(cfg.validate().is_ok());
}

#[test]
fn parse_empty_toml_uses_defaults() {
    let cfg: SchedulerConfig = toml::from_str("").unwrap();
    assert_eq!(cfg.worker_threads, 2);
    assert_eq!(cfg.thread_name_prefix, "lull-worker");
}

#[test]
fn parse_full_toml() {
    let toml = r#"
worker_threads = 3
queue_capacity = 128
full_policy = "reject"
tick_budget_ms = 10
default_priority = 5
condition_poll_ms = 50
failure_history = 8
synchronous = true
thread_name_prefix = "viewer-bg"
"#;
    let cfg: SchedulerConfig = toml::from_str(toml).unwrap();
    assert_eq!(cfg.worker_threads, 3);
    assert_eq!(cfg.queue_capacity, Some(128));
    assert_eq!(cfg.full_policy, FullPolicy::Reject);
    assert_eq!(cfg.tick_budget_ms, 10);
    assert_eq!(cfg.default_priority, Priority(5));
    assert_eq!(cfg.condition_poll_ms, 50);
    assert_eq!(cfg.failure_history, 8);
    assert!(cfg.synchronous);
    assert_eq!(cfg.thread_name_prefix, "viewer-bg");
}

#[test]
fn zero_capacity_rejected() {
    let err = SchedulerConfig::from_toml("queue_capacity = 0").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn zero_budget_rejected() {
    let cfg = SchedulerConfig {
        tick_budget_ms: 0,
        ..Default::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn malformed_toml_is_parse_error() {
    let err = SchedulerConfig::from_toml("worker_threads = \"many\"").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn missing_file_is_io_error() {
    let err = SchedulerConfig::from_file("/nonexistent/lull.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn overrides_apply() {
    let mut cfg = SchedulerConfig::default();
    cfg.apply_overrides_from(lookup(&[
        ("LULL_WORKER_THREADS", "4"),
        ("LULL_QUEUE_CAPACITY", "16"),
        ("LULL_FULL_POLICY", "Reject"),
        ("LULL_TICK_BUDGET_MS", "8"),
        ("LULL_DEFAULT_PRIORITY", "-2"),
        ("LULL_SYNCHRONOUS", "yes"),
    ]));
    assert_eq!(cfg.worker_threads, 4);
    assert_eq!(cfg.queue_capacity, Some(16));
    assert_eq!(cfg.full_policy, FullPolicy::Reject);
    assert_eq!(cfg.tick_budget_ms, 8);
    assert_eq!(cfg.default_priority, Priority(-2));
    assert!(cfg.synchronous);
}

#[test]
fn unbounded_override_clears_capacity() {
    let mut cfg = SchedulerConfig {
        queue_capacity: Some(8),
        ..Default::default()
    };
    cfg.apply_overrides_from(lookup(&[("LULL_QUEUE_CAPACITY", "unbounded")]));
    assert_eq!(cfg.queue_capacity, None);
}

#[test]
fn bad_overrides_are_ignored() {
    let mut cfg = SchedulerConfig::default();
    cfg.apply_overrides_from(lookup(&[
        ("LULL_WORKER_THREADS", "lots"),
        ("LULL_FULL_POLICY", "drop"),
        ("LULL_SYNCHRONOUS", "maybe"),
    ]));
    assert_eq!(cfg.worker_threads, 2);
    assert_eq!(cfg.full_policy, FullPolicy::Block);
    assert!(!cfg.synchronous);
}

#[test]
fn resolved_worker_threads() {
    let mut cfg = SchedulerConfig {
        worker_threads: 0,
        ..Default::default()
    };
    let auto = cfg.resolved_worker_threads();
    assert!((1..=4).contains(&auto));

    cfg.worker_threads = 8;
    assert_eq!(cfg.resolved_worker_threads(), 8);
}
