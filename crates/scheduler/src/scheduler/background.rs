use lull_core::TaskFailure;
use tracing::debug;

use crate::error::SchedulerError;
use crate::pool::{Continuation, Job};
use crate::task::{BackgroundOptions, TaskHandle};

use super::core::Scheduler;

impl Scheduler {
    /// Run `action` on a worker thread. The result is discarded; failures
    /// are still recorded in the metrics.
    pub fn enqueue_background<T, F>(&self, action: F, options: BackgroundOptions) -> Result<TaskHandle, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_job(action, None, options)
    }

    /// Run `action` on a worker thread, then run `then` on the idle thread
    /// with its value or failure.
    ///
    /// The continuation is queued with the options' priority and runs on
    /// the next tick after the action completes. It is not posted if the
    /// action was cancelled before it started.
    pub fn enqueue_background_then<T, F, C>(
        &self,
        action: F,
        then: C,
        options: BackgroundOptions,
    ) -> Result<TaskHandle, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        C: FnOnce(Result<T, TaskFailure>) -> anyhow::Result<()> + Send + 'static,
    {
        let then: Continuation<T> = Box::new(then);
        self.submit_job(action, Some(then), options)
    }

    /// [`Scheduler::enqueue_background_then`] with default options.
    pub fn background<T, F, C>(&self, action: F, then: C) -> Result<TaskHandle, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        C: FnOnce(Result<T, TaskFailure>) -> anyhow::Result<()> + Send + 'static,
    {
        self.enqueue_background_then(action, then, BackgroundOptions::default())
    }

    fn submit_job<T, F>(
        &self,
        action: F,
        then: Option<Continuation<T>>,
        options: BackgroundOptions,
    ) -> Result<TaskHandle, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let priority = options.priority.unwrap_or(self.inner.config.default_priority);
        let job = Job::new(options.name, priority, action, then);
        let handle = job.handle().clone();
        self.inner.pool.submit(job)?;
        self.track(&handle, true);
        debug!(task = %handle.id(), name = handle.label(), "queued background task");
        Ok(handle)
    }
}
