//! Fixed-size pool of background worker threads.
//!
//! Workers pull [`Job`]s from a shared channel, skip cancelled ones, run the
//! rest to completion and hand any continuation to a [`ContinuationSink`]
//! so it executes on the idle thread. A job failure (error or panic) is
//! contained inside the job and never takes a worker down.

mod channel;
mod job;
mod sink;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use lull_core::{FullPolicy, SchedulerConfig};
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::lock;
use crate::metrics::SchedulerMetrics;

use self::channel::{job_channel, JobReceiver, JobSender};

pub use self::job::{Continuation, Job};
pub use self::sink::{ContinuationSink, IdleQueueSink};

/// Background worker pool.
pub struct WorkerPool {
    sender: Mutex<Option<JobSender>>,
    workers: Mutex<Vec<Worker>>,
    accepting: AtomicBool,
    policy: FullPolicy,
    worker_count: usize,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    metrics: Arc<RwLock<SchedulerMetrics>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("accepting", &self.is_accepting())
            .field("policy", &self.policy)
            .field("pending_jobs", &self.pending_jobs())
            .field("active_jobs", &self.active_jobs())
            .finish()
    }
}

struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

/// Everything a worker thread owns.
struct WorkerContext {
    id: usize,
    worker_count: usize,
    receiver: Arc<Mutex<JobReceiver>>,
    sink: Arc<dyn ContinuationSink>,
    metrics: Arc<RwLock<SchedulerMetrics>>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl WorkerContext {
    fn run(self) {
        debug!(worker = self.id, "worker started");
        loop {
            let job = lock(&self.receiver).blocking_recv();
            let Some(job) = job else {
                break;
            };
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.process(job);
        }
        debug!(worker = self.id, "worker exiting");
    }

    fn process(&self, job: Job) {
        if !job.handle.begin() {
            debug!(worker = self.id, task = %job.handle.id(), "skipping cancelled background task");
            if let Ok(mut m) = self.metrics.write() {
                m.background_cancelled += 1;
            }
            return;
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.update_utilization(active);
        debug!(
            worker = self.id,
            task = %job.handle.id(),
            name = job.handle.label(),
            "running background task"
        );

        let started = Instant::now();
        let (handle, priority, outcome) = job.run();
        let duration = started.elapsed();
        handle.finish(&outcome.result);

        let active = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        self.update_utilization(active);

        match outcome.result {
            Ok(()) => {
                if let Ok(mut m) = self.metrics.write() {
                    m.background_completed += 1;
                    m.record_execution(handle.label(), duration);
                }
            }
            Err(failure) => {
                warn!(
                    worker = self.id,
                    task = %handle.id(),
                    name = handle.label(),
                    error = %failure,
                    "background task failed"
                );
                if let Ok(mut m) = self.metrics.write() {
                    m.record_failure(handle.id(), handle.name(), failure, true);
                }
            }
        }

        if let Some(continuation) = outcome.continuation {
            let name = handle.name().map(|n| format!("{n}.then"));
            self.sink.post(handle.id(), name, priority, continuation);
        }
    }

    fn update_utilization(&self, active: usize) {
        if let Ok(mut m) = self.metrics.write() {
            m.worker_utilization = active as f64 / self.worker_count as f64;
        }
    }
}

impl WorkerPool {
    /// Validate `config` and start `config.resolved_worker_threads()` named
    /// worker threads.
    pub fn new(
        config: &SchedulerConfig,
        sink: Arc<dyn ContinuationSink>,
        metrics: Arc<RwLock<SchedulerMetrics>>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let worker_count = config.resolved_worker_threads();
        let (sender, receiver) = job_channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let queued = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let context = WorkerContext {
                id,
                worker_count,
                receiver: Arc::clone(&receiver),
                sink: Arc::clone(&sink),
                metrics: Arc::clone(&metrics),
                queued: Arc::clone(&queued),
                active: Arc::clone(&active),
            };
            let thread = thread::Builder::new()
                .name(format!("{}-{id}", config.thread_name_prefix))
                .spawn(move || context.run())?;
            workers.push(Worker {
                id,
                thread: Some(thread),
            });
        }

        info!(
            workers = worker_count,
            capacity = ?config.queue_capacity,
            policy = ?config.full_policy,
            "worker pool started"
        );

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            accepting: AtomicBool::new(true),
            policy: config.full_policy,
            worker_count,
            queued,
            active,
            metrics,
        })
    }

    /// Queue a job for a worker.
    ///
    /// With a bounded channel that is full, either blocks or fails with
    /// [`SchedulerError::QueueFull`] depending on the [`FullPolicy`]. Called
    /// from inside an async runtime, `Block` never blocks: a full channel
    /// fails with [`SchedulerError::QueueFull`] instead. After
    /// shutdown has begun, fails with [`SchedulerError::ShuttingDown`]. A
    /// rejected job's handle is cancelled so it never looks pending.
    pub fn submit(&self, job: Job) -> Result<(), SchedulerError> {
        let sender = if self.is_accepting() {
            lock(&self.sender).clone()
        } else {
            None
        };
        let Some(sender) = sender else {
            job.handle.cancel();
            self.record_rejection();
            return Err(SchedulerError::ShuttingDown);
        };

        self.queued.fetch_add(1, Ordering::SeqCst);
        match sender.send(job, self.policy) {
            Ok(()) => {
                if let Ok(mut m) = self.metrics.write() {
                    m.background_submitted += 1;
                }
                Ok(())
            }
            Err((err, job)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                job.handle.cancel();
                self.record_rejection();
                debug!(task = %job.handle.id(), error = %err, "background submission rejected");
                Err(err)
            }
        }
    }

    fn record_rejection(&self) {
        if let Ok(mut m) = self.metrics.write() {
            m.background_rejected += 1;
        }
    }

    /// Stop accepting jobs, let the workers drain everything already
    /// accepted, then join them. Idempotent.
    pub fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!(pending = self.pending_jobs(), "worker pool shutting down");
        }
        drop(lock(&self.sender).take());

        let current = thread::current().id();
        let handles: Vec<(usize, JoinHandle<()>)> = lock(&self.workers)
            .iter_mut()
            .filter_map(|w| w.thread.take().map(|t| (w.id, t)))
            .collect();
        if handles.is_empty() {
            return;
        }

        for (id, handle) in handles {
            if handle.thread().id() == current {
                warn!(worker = id, "shutdown requested from a worker thread; not joining itself");
                continue;
            }
            if handle.join().is_err() {
                warn!(worker = id, "worker thread panicked");
            }
        }
        info!("worker pool stopped");
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Jobs accepted but not yet picked up by a worker.
    pub fn pending_jobs(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Jobs currently executing.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.pending_jobs() == 0 && self.active_jobs() == 0
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::time::Duration;

    use lull_core::{Priority, TaskFailure, TaskId, TaskState};

    use super::*;
    use crate::task::{IdleAction, TaskHandle};

    /// Collects continuations instead of queueing them.
    #[derive(Default)]
    struct CollectingSink {
        posted: Mutex<Vec<(TaskId, Option<String>, Priority, IdleAction)>>,
    }

    impl fmt::Debug for CollectingSink {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("CollectingSink")
                .field("posted", &lock(&self.posted).len())
                .finish()
        }
    }

    impl ContinuationSink for CollectingSink {
        fn post(&self, origin: TaskId, name: Option<String>, priority: Priority, action: IdleAction) {
            lock(&self.posted).push((origin, name, priority, action));
        }
    }

    impl CollectingSink {
        fn drain(&self) -> Vec<(TaskId, Option<String>, Priority, IdleAction)> {
            std::mem::take(&mut *lock(&self.posted))
        }
    }

    fn pool(config: SchedulerConfig) -> (WorkerPool, Arc<CollectingSink>, Arc<RwLock<SchedulerMetrics>>) {
        let sink = Arc::new(CollectingSink::default());
        let metrics = Arc::new(RwLock::new(SchedulerMetrics::default()));
        let pool = WorkerPool::new(&config, sink.clone(), Arc::clone(&metrics)).unwrap();
        (pool, sink, metrics)
    }

    fn job<T, F>(action: F) -> (Job, TaskHandle)
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let job = Job::new::<T, F>(None, Priority::DEFAULT, action, None);
        let handle = job.handle().clone();
        (job, handle)
    }

    #[test]
    fn runs_every_job_once() {
        let (pool, _, metrics) = pool(SchedulerConfig::default());
        let (tx, rx) = mpsc::channel();

        for i in 0..20 {
            let tx = tx.clone();
            let (job, _) = job(move || {
                tx.send(i).unwrap();
                Ok(())
            });
            pool.submit(job).unwrap();
        }
        pool.shutdown();

        let seen: HashSet<i32> = rx.try_iter().collect();
        assert_eq!(seen.len(), 20);
        assert_eq!(metrics.read().unwrap().background_completed, 20);
        assert!(pool.is_idle());
    }

    #[test]
    fn continuation_carries_result_and_is_not_run_by_worker() {
        let (pool, sink, _) = pool(SchedulerConfig::default());
        let (tx, rx) = mpsc::channel();
        let then: Continuation<u32> = Box::new(move |result| {
            tx.send((result, thread::current().id())).unwrap();
            Ok(())
        });
        let job = Job::new(Some("load".into()), Priority(4), || Ok(42u32), Some(then));
        let handle = job.handle().clone();
        pool.submit(job).unwrap();
        pool.shutdown();

        assert_eq!(handle.state(), TaskState::Completed);
        let mut posted = sink.drain();
        assert_eq!(posted.len(), 1);
        let (origin, name, priority, action) = posted.remove(0);
        assert_eq!(origin, handle.id());
        assert_eq!(name.as_deref(), Some("load.then"));
        assert_eq!(priority, Priority(4));
        assert!(rx.try_recv().is_err(), "continuation must not run on the worker");

        action().unwrap();
        let (result, ran_on) = rx.recv().unwrap();
        assert_eq!(result, Ok(42));
        assert_eq!(ran_on, thread::current().id());
    }

    #[test]
    fn failure_reaches_continuation_and_worker_survives() {
        let config = SchedulerConfig {
            worker_threads: 1,
            ..Default::default()
        };
        let (pool, sink, metrics) = pool(config);
        let (tx, rx) = mpsc::channel();

        let then: Continuation<()> = Box::new(move |result| {
            tx.send(result).unwrap();
            Ok(())
        });
        let job = Job::new(
            None,
            Priority::DEFAULT,
            || -> anyhow::Result<()> { panic!("worker bug") },
            Some(then),
        );
        let handle = job.handle().clone();
        pool.submit(job).unwrap();
        let (after, after_handle) = self::job(|| Ok(()));
        pool.submit(after).unwrap();
        pool.shutdown();

        assert_eq!(handle.state(), TaskState::Failed);
        assert_eq!(after_handle.state(), TaskState::Completed);
        for (_, _, _, action) in sink.drain() {
            action().unwrap();
        }
        assert_eq!(rx.recv().unwrap(), Err(TaskFailure::Panicked("worker bug".into())));
        assert_eq!(metrics.read().unwrap().background_failed, 1);
    }

    #[test]
    fn cancelled_job_never_runs() {
        let config = SchedulerConfig {
            worker_threads: 1,
            ..Default::default()
        };
        let (pool, sink, metrics) = pool(config);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let (blocker, _) = job(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
            Ok(())
        });
        pool.submit(blocker).unwrap();
        started_rx.recv().unwrap();

        let (tx, rx) = mpsc::channel::<()>();
        let (victim, victim_handle) = job(move || {
            tx.send(()).unwrap();
            Ok(())
        });
        pool.submit(victim).unwrap();
        assert!(victim_handle.cancel());
        gate_tx.send(()).unwrap();
        pool.shutdown();

        assert!(rx.try_recv().is_err());
        assert_eq!(victim_handle.state(), TaskState::Cancelled);
        assert!(sink.drain().is_empty());
        assert_eq!(metrics.read().unwrap().background_cancelled, 1);
    }

    #[test]
    fn bounded_reject_reports_queue_full() {
        let config = SchedulerConfig {
            worker_threads: 1,
            queue_capacity: Some(1),
            full_policy: FullPolicy::Reject,
            ..Default::default()
        };
        let (pool, _, metrics) = pool(config);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let (blocker, _) = job(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
            Ok(())
        });
        pool.submit(blocker).unwrap();
        started_rx.recv().unwrap();

        let (queued, queued_handle) = job(|| Ok(()));
        pool.submit(queued).unwrap();

        let (overflow, overflow_handle) = job(|| Ok(()));
        let err = pool.submit(overflow).unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull { capacity: 1 }));
        assert!(overflow_handle.is_cancelled());

        gate_tx.send(()).unwrap();
        pool.shutdown();
        assert_eq!(queued_handle.state(), TaskState::Completed);
        assert_eq!(metrics.read().unwrap().background_rejected, 1);
    }

    #[test]
    fn bounded_block_waits_instead_of_dropping() {
        let config = SchedulerConfig {
            worker_threads: 1,
            queue_capacity: Some(1),
            full_policy: FullPolicy::Block,
            ..Default::default()
        };
        let (pool, _, metrics) = pool(config);
        for _ in 0..10 {
            let (j, _) = job(|| {
                thread::sleep(Duration::from_millis(2));
                Ok(())
            });
            pool.submit(j).unwrap();
        }
        pool.shutdown();
        assert_eq!(metrics.read().unwrap().background_completed, 10);
    }

    #[test]
    fn block_policy_inside_runtime_fails_instead_of_parking() {
        let config = SchedulerConfig {
            worker_threads: 1,
            queue_capacity: Some(1),
            full_policy: FullPolicy::Block,
            ..Default::default()
        };
        let (pool, _, metrics) = pool(config);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let (blocker, _) = job(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
            Ok(())
        });
        pool.submit(blocker).unwrap();
        started_rx.recv().unwrap();

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (queued, overflow) = rt.block_on(async {
            let (queued, queued_handle) = job(|| Ok(()));
            let (overflow, overflow_handle) = job(|| Ok(()));
            (
                pool.submit(queued).map(|()| queued_handle),
                pool.submit(overflow).map_err(|e| (e, overflow_handle)),
            )
        });
        let queued_handle = queued.unwrap();
        let (err, overflow_handle) = overflow.unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull { capacity: 1 }));
        assert!(overflow_handle.is_cancelled());

        gate_tx.send(()).unwrap();
        pool.shutdown();
        assert_eq!(queued_handle.state(), TaskState::Completed);
        assert_eq!(metrics.read().unwrap().background_rejected, 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SchedulerConfig {
            queue_capacity: Some(0),
            ..Default::default()
        };
        let sink = Arc::new(CollectingSink::default());
        let metrics = Arc::new(RwLock::new(SchedulerMetrics::default()));
        let err = WorkerPool::new(&config, sink, metrics).unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let (pool, _, _) = pool(SchedulerConfig::default());
        pool.shutdown();
        let (j, handle) = job(|| Ok(()));
        assert!(matches!(pool.submit(j), Err(SchedulerError::ShuttingDown)));
        assert!(handle.is_cancelled());
        // Second shutdown is a no-op.
        pool.shutdown();
    }

    #[test]
    fn workers_are_named() {
        let config = SchedulerConfig {
            worker_threads: 1,
            thread_name_prefix: "viewer-bg".into(),
            ..Default::default()
        };
        let (pool, _, _) = pool(config);
        let (tx, rx) = mpsc::channel();
        let (j, _) = job(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
            Ok(())
        });
        pool.submit(j).unwrap();
        pool.shutdown();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("viewer-bg-0"));
    }
}
