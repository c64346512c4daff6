use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use lull_core::{TaskFailure, TaskId};

/// One recorded task failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub task_id: TaskId,
    pub name: Option<String>,
    pub failure: TaskFailure,
    /// True if the failing action ran on a worker thread.
    pub background: bool,
    pub at: DateTime<Utc>,
}

/// Scheduler operational metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    /// Successful executions by task name.
    pub tasks_executed: HashMap<String, u64>,
    /// Average task duration by task name.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Last execution time by task name.
    pub last_run: HashMap<String, DateTime<Utc>>,
    pub idle_completed: u64,
    pub idle_failed: u64,
    pub idle_cancelled: u64,
    /// Idle tasks dropped because they sat in the queue past their expiry.
    pub idle_expired: u64,
    /// Idle tasks that ran longer than their advisory timeout.
    pub timeouts_exceeded: u64,
    /// Condition checks of gated idle tasks that found the condition false.
    pub condition_polls: u64,
    pub ticks: u64,
    /// Ticks that stopped with due tasks still queued.
    pub budget_exhausted_ticks: u64,
    pub background_submitted: u64,
    pub background_completed: u64,
    pub background_failed: u64,
    pub background_cancelled: u64,
    pub background_rejected: u64,
    /// Idle tasks queued at the last snapshot.
    pub idle_pending: usize,
    /// Background jobs waiting for a worker at the last snapshot.
    pub background_pending: usize,
    /// Worker utilization ratio (0.0 - 1.0).
    pub worker_utilization: f64,
    /// Most recent failures, oldest first.
    pub recent_failures: VecDeque<FailureRecord>,
    #[serde(skip)]
    failure_history: usize,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::with_failure_history(64)
    }
}

impl SchedulerMetrics {
    pub fn with_failure_history(failure_history: usize) -> Self {
        Self {
            tasks_executed: HashMap::new(),
            avg_task_duration: HashMap::new(),
            last_run: HashMap::new(),
            idle_completed: 0,
            idle_failed: 0,
            idle_cancelled: 0,
            idle_expired: 0,
            timeouts_exceeded: 0,
            condition_polls: 0,
            ticks: 0,
            budget_exhausted_ticks: 0,
            background_submitted: 0,
            background_completed: 0,
            background_failed: 0,
            background_cancelled: 0,
            background_rejected: 0,
            idle_pending: 0,
            background_pending: 0,
            worker_utilization: 0.0,
            recent_failures: VecDeque::new(),
            failure_history,
        }
    }

    /// Record a successful task execution.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration) {
        *self.tasks_executed.entry(task_name.to_string()).or_default() += 1;
        self.last_run.insert(task_name.to_string(), Utc::now());

        // Update rolling average duration
        let count = self.tasks_executed[task_name];
        let prev_avg = self
            .avg_task_duration
            .get(task_name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(task_name.to_string(), new_avg);
    }

    /// Append a failure, evicting the oldest beyond the configured history.
    pub fn record_failure(&mut self, task_id: TaskId, name: Option<&str>, failure: TaskFailure, background: bool) {
        if background {
            self.background_failed += 1;
        } else {
            self.idle_failed += 1;
        }
        if self.failure_history == 0 {
            return;
        }
        while self.recent_failures.len() >= self.failure_history {
            self.recent_failures.pop_front();
        }
        self.recent_failures.push_back(FailureRecord {
            task_id,
            name: name.map(str::to_owned),
            failure,
            background,
            at: Utc::now(),
        });
    }

    /// Total idle tasks that reached a terminal state.
    pub fn idle_finished(&self) -> u64 {
        self.idle_completed + self.idle_failed + self.idle_cancelled + self.idle_expired
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
