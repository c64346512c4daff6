use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::Priority;

/// What a bounded background queue does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullPolicy {
    /// The submitting thread waits until a slot frees up.
    #[default]
    Block,
    /// The submission fails with `QueueFull`.
    Reject,
}

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of background worker threads. 0 = available parallelism (capped at 4).
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Capacity of the background job channel. `None` = unbounded.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// Behaviour of a bounded background channel when full.
    #[serde(default)]
    pub full_policy: FullPolicy,
    /// Default per-tick time budget in milliseconds.
    #[serde(default = "default_tick_budget_ms")]
    pub tick_budget_ms: u64,
    /// Priority given to tasks submitted without one.
    #[serde(default)]
    pub default_priority: Priority,
    /// Poll interval for conditional idle tasks, in milliseconds.
    #[serde(default = "default_condition_poll_ms")]
    pub condition_poll_ms: u64,
    /// Number of failures kept in the metrics history.
    #[serde(default = "default_failure_history")]
    pub failure_history: usize,
    /// Run idle submissions inline instead of queueing them.
    #[serde(default)]
    pub synchronous: bool,
    /// Name prefix for worker threads (`{prefix}-{n}`).
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_worker_threads() -> usize { 2 }
fn default_tick_budget_ms() -> u64 { 15 }
fn default_condition_poll_ms() -> u64 { 20 }
fn default_failure_history() -> usize { 64 }
fn default_thread_name_prefix() -> String { "lull-worker".to_string() }

/// Upper bound when the worker count is auto-detected; the pool exists to
/// keep work off the UI thread, not to saturate the machine.
const AUTO_WORKER_CAP: usize = 4;

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            queue_capacity: None,
            full_policy: FullPolicy::default(),
            tick_budget_ms: default_tick_budget_ms(),
            default_priority: Priority::DEFAULT,
            condition_poll_ms: default_condition_poll_ms(),
            failure_history: default_failure_history(),
            synchronous: false,
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get().min(AUTO_WORKER_CAP))
                .unwrap_or(2)
        } else {
            self.worker_threads
        }
    }

    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }

    pub fn condition_poll(&self) -> Duration {
        Duration::from_millis(self.condition_poll_ms)
    }
}
