use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use lull_core::{SchedulerConfig, TaskId};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::driver::{IdleDriver, TickReport};
use crate::error::SchedulerError;
use crate::lock;
use crate::metrics::SchedulerMetrics;
use crate::pool::{IdleQueueSink, WorkerPool};
use crate::queue::TaskQueue;
use crate::task::TaskHandle;

const TRACKED_PRUNE_AT: usize = 1024;

pub(super) struct Tracked {
    pub(super) handle: TaskHandle,
    pub(super) background: bool,
}

pub(super) struct Inner {
    pub(super) config: SchedulerConfig,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) queue: Arc<Mutex<TaskQueue>>,
    pub(super) driver: IdleDriver,
    pub(super) pool: WorkerPool,
    pub(super) metrics: Arc<RwLock<SchedulerMetrics>>,
    /// Handles that do not live in the idle queue: background jobs and
    /// condition-gated tasks. Consulted by `cancel` and the name lookups.
    pub(super) tracked: Mutex<HashMap<TaskId, Tracked>>,
    /// Open synchronous windows per thread. A window only affects
    /// submissions from the thread that opened it.
    pub(super) sync_windows: Mutex<HashMap<ThreadId, usize>>,
}

/// The idle-task scheduler. Cheap to clone; clones share one queue and pool.
#[derive(Clone)]
pub struct Scheduler {
    pub(super) inner: Arc<Inner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending_idle", &self.pending_idle())
            .field("synchronous", &self.is_synchronous())
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl Scheduler {
    /// Validate `config` and start the worker pool on the system clock.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`Scheduler::new`] with a custom time source for delays,
    /// budgets and timeouts.
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Result<Self, SchedulerError> {
        config.validate()?;

        let queue = Arc::new(Mutex::new(TaskQueue::new()));
        let metrics = Arc::new(RwLock::new(SchedulerMetrics::with_failure_history(
            config.failure_history,
        )));
        let sink = Arc::new(IdleQueueSink::new(Arc::clone(&queue), Arc::clone(&clock)));
        let pool = WorkerPool::new(&config, sink, Arc::clone(&metrics))?;
        let driver = IdleDriver::new(Arc::clone(&queue), Arc::clone(&clock), Arc::clone(&metrics));

        info!(
            workers = pool.worker_count(),
            tick_budget_ms = config.tick_budget_ms,
            synchronous = config.synchronous,
            "scheduler started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                clock,
                queue,
                driver,
                pool,
                metrics,
                tracked: Mutex::new(HashMap::new()),
                sync_windows: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Run due idle tasks on the calling thread for at most `budget`.
    ///
    /// Meant to be called by the host event loop every 10-20 ms. The first
    /// thread to tick becomes the idle thread.
    pub fn tick(&self, budget: Duration) -> TickReport {
        let report = self.inner.driver.run_pending(budget);
        self.prune_tracked();
        if let Ok(mut m) = self.inner.metrics.write() {
            m.background_pending = self.inner.pool.pending_jobs();
        }
        report
    }

    /// Tick with the configured `tick_budget_ms`.
    pub fn tick_default(&self) -> TickReport {
        self.tick(self.inner.config.tick_budget())
    }

    /// Whether the calling thread is the one driving idle tasks.
    pub fn is_idle_thread(&self) -> bool {
        self.inner.driver.is_driver_thread()
    }

    /// Make the calling thread the idle thread before the first tick.
    /// Returns `false` if another thread is already bound.
    pub fn bind_idle_thread(&self) -> bool {
        self.inner.driver.bind_current_thread()
    }

    /// Snapshot of the scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut snapshot = match self.inner.metrics.read() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        snapshot.idle_pending = self.pending_idle();
        snapshot.background_pending = self.inner.pool.pending_jobs();
        snapshot
    }

    /// Shared metrics, for readers that do not want a clone.
    pub fn metrics_handle(&self) -> Arc<RwLock<SchedulerMetrics>> {
        Arc::clone(&self.inner.metrics)
    }

    /// Idle tasks currently queued.
    pub fn pending_idle(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Background jobs accepted but not yet picked up by a worker.
    pub fn pending_background(&self) -> usize {
        self.inner.pool.pending_jobs()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.pool.worker_count()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    /// Stop the worker pool: new background submissions fail with
    /// [`SchedulerError::ShuttingDown`], accepted jobs are drained, then the
    /// workers are joined. Continuations of drained jobs stay queued for the
    /// next tick. Dropping the last clone does the same.
    pub fn shutdown(&self) {
        info!("scheduler shutdown requested");
        self.inner.pool.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        !self.inner.pool.is_accepting()
    }

    /// Remember a handle that lives outside the idle queue. Finished
    /// entries are dropped on each tick; a host that never ticks gets them
    /// dropped here once the map grows past `TRACKED_PRUNE_AT`.
    pub(super) fn track(&self, handle: &TaskHandle, background: bool) {
        let mut tracked = lock(&self.inner.tracked);
        if tracked.len() >= TRACKED_PRUNE_AT {
            tracked.retain(|_, t| !t.handle.is_finished());
        }
        tracked.insert(
            handle.id(),
            Tracked {
                handle: handle.clone(),
                background,
            },
        );
    }

    fn prune_tracked(&self) {
        lock(&self.inner.tracked).retain(|_, t| !t.handle.is_finished());
    }

    /// Unfinished tracked handles matching `filter`.
    pub(super) fn tracked_where<P>(&self, filter: P) -> Vec<TaskHandle>
    where
        P: Fn(&Tracked) -> bool,
    {
        lock(&self.inner.tracked)
            .values()
            .filter(|t| !t.handle.is_finished() && filter(t))
            .map(|t| t.handle.clone())
            .collect()
    }

    /// Synchronous windows open on the calling thread.
    pub(super) fn sync_depth(&self) -> usize {
        lock(&self.inner.sync_windows)
            .get(&thread::current().id())
            .copied()
            .unwrap_or(0)
    }
}
