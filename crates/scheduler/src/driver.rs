//! Cooperative executor for idle tasks.
//!
//! The host event loop calls [`IdleDriver::run_pending`] periodically from
//! its UI thread. Each call runs due tasks to completion, one at a time,
//! until the time budget is spent, then returns control to the host.

use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use lull_core::TaskState;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::lock;
use crate::metrics::SchedulerMetrics;
use crate::queue::{Pop, TaskQueue};
use crate::task::{guarded, Task};

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Tasks whose action ran and succeeded.
    pub executed: usize,
    /// Tasks whose action ran and failed.
    pub failed: usize,
    /// Tasks skipped because they were cancelled.
    pub cancelled: usize,
    /// Tasks dropped because they expired in the queue.
    pub expired: usize,
    /// Gated tasks whose condition was checked and still false.
    pub polled: usize,
    /// The tick stopped with due tasks still queued.
    pub budget_exhausted: bool,
    pub elapsed: Duration,
    /// Tasks left in the queue after the tick.
    pub remaining: usize,
}

impl TickReport {
    /// Number of task bodies invoked during the tick.
    pub fn ran(&self) -> usize {
        self.executed + self.failed
    }
}

/// Executes due idle tasks on the calling thread.
#[derive(Debug)]
pub struct IdleDriver {
    queue: Arc<Mutex<TaskQueue>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<RwLock<SchedulerMetrics>>,
    thread: OnceLock<ThreadId>,
}

impl IdleDriver {
    pub fn new(
        queue: Arc<Mutex<TaskQueue>>,
        clock: Arc<dyn Clock>,
        metrics: Arc<RwLock<SchedulerMetrics>>,
    ) -> Self {
        Self {
            queue,
            clock,
            metrics,
            thread: OnceLock::new(),
        }
    }

    /// Bind the driver to the current thread. The first thread to tick is
    /// bound automatically. Returns whether the current thread is the bound one.
    pub fn bind_current_thread(&self) -> bool {
        let current = thread::current().id();
        *self.thread.get_or_init(|| current) == current
    }

    pub fn is_driver_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    /// Run due tasks until `budget` is spent or nothing is due.
    ///
    /// The budget is checked before each task starts, so a tick overruns it
    /// by at most the duration of the last task. At least one due task runs
    /// per tick regardless of budget. Failures inside tasks are recorded and
    /// never returned.
    pub fn run_pending(&self, budget: Duration) -> TickReport {
        if !self.bind_current_thread() {
            warn!(
                thread = ?thread::current().id(),
                "idle tick from a thread other than the bound driver thread"
            );
        }

        let start = self.clock.now();
        let mut report = TickReport::default();

        loop {
            let now = self.clock.now();
            let elapsed = now.saturating_duration_since(start);
            if report.ran() + report.polled > 0 && elapsed >= budget {
                report.budget_exhausted = lock(&self.queue).has_due(now);
                break;
            }

            let popped = lock(&self.queue).pop_due(now);
            match popped {
                Pop::Ready(task) => self.execute(task, now, &mut report),
                Pop::NotReady { .. } | Pop::Empty => break,
            }
        }

        report.elapsed = self.clock.now().saturating_duration_since(start);
        report.remaining = lock(&self.queue).len();

        if let Ok(mut m) = self.metrics.write() {
            m.ticks += 1;
            if report.budget_exhausted {
                m.budget_exhausted_ticks += 1;
            }
            m.idle_pending = report.remaining;
        }

        if report.budget_exhausted {
            debug!(
                ran = report.ran(),
                remaining = report.remaining,
                elapsed = ?report.elapsed,
                "tick budget exhausted"
            );
        }
        report
    }

    /// Run one popped task: skip it if expired or cancelled, otherwise invoke
    /// it and record the outcome.
    pub(crate) fn execute(&self, task: Task, now: Instant, report: &mut TickReport) {
        if task.is_expired(now) {
            if task.handle.cancel() {
                debug!(task = %task.id(), name = task.handle.label(), "dropping expired idle task");
                report.expired += 1;
                if let Ok(mut m) = self.metrics.write() {
                    m.idle_expired += 1;
                }
            }
            return;
        }

        let Task {
            handle,
            action,
            timeout,
            owner,
            ..
        } = task;

        if !handle.begin() {
            debug!(task = %handle.id(), name = handle.label(), "skipping cancelled idle task");
            report.cancelled += 1;
            if let Ok(mut m) = self.metrics.write() {
                m.idle_cancelled += 1;
            }
            return;
        }

        debug!(task = %handle.id(), name = handle.label(), "running idle task");
        let started = self.clock.now();
        let result = guarded(action);
        let duration = self.clock.now().saturating_duration_since(started);
        handle.finish(&result);

        // A condition poll reports under the gated task's handle, and only
        // once that handle has settled.
        let owner = match owner {
            Some(owner) => match owner.state() {
                TaskState::Pending | TaskState::Running => {
                    report.polled += 1;
                    if let Ok(mut m) = self.metrics.write() {
                        m.condition_polls += 1;
                    }
                    return;
                }
                TaskState::Cancelled => {
                    report.cancelled += 1;
                    if let Ok(mut m) = self.metrics.write() {
                        m.idle_cancelled += 1;
                    }
                    return;
                }
                TaskState::Completed | TaskState::Failed => owner,
            },
            None => handle,
        };

        let mut metrics = self.metrics.write().ok();

        if let Some(limit) = timeout {
            if duration > limit {
                warn!(
                    task = %owner.id(),
                    name = owner.label(),
                    ?duration,
                    ?limit,
                    "idle task overran its advisory timeout"
                );
                if let Some(m) = metrics.as_mut() {
                    m.timeouts_exceeded += 1;
                }
            }
        }

        match result {
            Ok(()) => {
                report.executed += 1;
                if let Some(m) = metrics.as_mut() {
                    m.idle_completed += 1;
                    m.record_execution(owner.label(), duration);
                }
            }
            Err(failure) => {
                report.failed += 1;
                warn!(task = %owner.id(), name = owner.label(), error = %failure, "idle task failed");
                if let Some(m) = metrics.as_mut() {
                    m.record_failure(owner.id(), owner.name(), failure, false);
                }
            }
        }
    }
}
