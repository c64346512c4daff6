//! Idle-task scheduling for applications driven by a single-threaded event loop.
//!
//! Work is submitted through [`Scheduler`]. Idle tasks are queued in a
//! [`TaskQueue`] and executed on the host's UI thread each time it calls
//! [`Scheduler::tick`], bounded by a time budget. Background tasks run on a
//! small [`WorkerPool`]; their continuations are posted back onto the idle
//! queue so UI-affecting follow-ups always run on the UI thread.

pub mod clock;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod task;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{IdleDriver, TickReport};
pub use error::SchedulerError;
pub use metrics::{FailureRecord, SchedulerMetrics};
pub use pool::{Continuation, ContinuationSink, IdleQueueSink, Job, WorkerPool};
pub use queue::{Pop, TaskQueue};
pub use scheduler::{Scheduler, SynchronousWindow};
pub use task::{BackgroundOptions, DuplicatePolicy, IdleAction, IdleOptions, Task, TaskHandle};

pub use lull_core::{FullPolicy, Priority, SchedulerConfig, TaskFailure, TaskId, TaskState};

/// Lock a mutex, recovering the guard if a previous holder panicked.
/// Task bodies never run under these locks, so the data stays consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
