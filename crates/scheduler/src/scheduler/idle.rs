use std::thread::{self, ThreadId};

use lull_core::TaskId;
use tracing::{debug, info};

use crate::driver::TickReport;
use crate::lock;
use crate::task::{DuplicatePolicy, IdleAction, IdleOptions, Task, TaskHandle};

use super::core::Scheduler;

/// While alive, idle submissions made from the thread that opened the
/// window run inline instead of being queued. Other threads keep queueing.
/// Windows nest.
#[derive(Debug)]
#[must_use = "the window closes as soon as the guard is dropped"]
pub struct SynchronousWindow<'a> {
    scheduler: &'a Scheduler,
    thread: ThreadId,
}

impl Drop for SynchronousWindow<'_> {
    fn drop(&mut self) {
        let mut windows = lock(&self.scheduler.inner.sync_windows);
        if let Some(depth) = windows.get_mut(&self.thread) {
            *depth -= 1;
            if *depth == 0 {
                windows.remove(&self.thread);
            }
        }
    }
}

impl Scheduler {
    /// Queue `action` to run on the idle thread.
    ///
    /// Inside a synchronous window opened on this thread (or with
    /// `synchronous = true`) the action runs before this returns, ignoring
    /// any delay. Duplicate handling for
    /// named tasks follows [`IdleOptions::coalesce`] and
    /// [`IdleOptions::skip_if_queued`].
    pub fn enqueue_idle<F>(&self, action: F, options: IdleOptions) -> TaskHandle
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.enqueue_boxed(Box::new(action), options)
    }

    /// Queue `action` with default options.
    pub fn idle<F>(&self, action: F) -> TaskHandle
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.enqueue_idle(action, IdleOptions::default())
    }

    fn enqueue_boxed(&self, action: IdleAction, options: IdleOptions) -> TaskHandle {
        let task = self.build_task(action, &options);

        if self.is_synchronous() {
            return self.run_inline(task);
        }

        let mut queue = lock(&self.inner.queue);
        let handle = match (options.duplicate, options.name.as_deref()) {
            (DuplicatePolicy::Replace, Some(key)) => queue.coalesce(key, task),
            (DuplicatePolicy::Skip, Some(key)) => match queue.first_pending(key) {
                Some(existing) => {
                    debug!(name = key, task = %existing.id(), "idle task already queued; skipping");
                    return existing;
                }
                None => queue.push(task),
            },
            _ => queue.push(task),
        };
        drop(queue);

        debug!(task = %handle.id(), name = handle.label(), "queued idle task");
        handle
    }

    fn build_task(&self, action: IdleAction, options: &IdleOptions) -> Task {
        let now = self.inner.clock.now();
        let priority = options.priority.unwrap_or(self.inner.config.default_priority);
        let mut task = Task::from_boxed(action, options.name.clone(), now + options.after).with_priority(priority);
        if let Some(timeout) = options.timeout {
            task = task.with_timeout(timeout);
        }
        if let Some(ttl) = options.expire_after {
            task = task.expiring_at(now + ttl);
        }
        task
    }

    pub(super) fn run_inline(&self, task: Task) -> TaskHandle {
        let handle = task.handle().clone();
        debug!(task = %handle.id(), name = handle.label(), "running idle task synchronously");
        let mut report = TickReport::default();
        self.inner.driver.execute(task, self.inner.clock.now(), &mut report);
        handle
    }

    /// Cancel a pending idle or background task.
    ///
    /// Returns `true` if the task is now guaranteed never to start. A
    /// running task is never interrupted; unknown ids are a no-op.
    pub fn cancel(&self, id: TaskId) -> bool {
        if lock(&self.inner.queue).cancel(id) {
            debug!(task = %id, "cancelled idle task");
            return true;
        }
        let tracked = lock(&self.inner.tracked).get(&id).map(|t| t.handle.clone());
        match tracked {
            Some(handle) => {
                let cancelled = handle.cancel();
                if cancelled {
                    debug!(task = %id, name = handle.label(), "cancelled task");
                }
                cancelled
            }
            None => false,
        }
    }

    /// Cancel every pending task submitted under `name`. Returns how many
    /// were cancelled.
    pub fn cancel_named(&self, name: &str) -> usize {
        let queued = lock(&self.inner.queue).cancel_named(name);
        let tracked = self
            .tracked_where(|t| t.handle.name() == Some(name))
            .iter()
            .filter(|h| h.cancel())
            .count();
        let total = queued + tracked;
        if total > 0 {
            debug!(name, cancelled = total, "cancelled named tasks");
        }
        total
    }

    /// Whether a task submitted under `name` is still waiting to run.
    pub fn is_queued(&self, name: &str) -> bool {
        lock(&self.inner.queue).contains_key(name)
            || !self
                .tracked_where(|t| t.handle.name() == Some(name))
                .is_empty()
    }

    /// Cancel every pending idle task, including condition-gated ones.
    /// Background jobs and their continuations already queued are cancelled
    /// only as far as they sit in the idle queue. Returns how many tasks
    /// were cancelled.
    pub fn reset(&self) -> usize {
        let queued = lock(&self.inner.queue).clear();
        let gated = self
            .tracked_where(|t| !t.background)
            .iter()
            .filter(|h| h.cancel())
            .count();
        let cancelled = queued + gated;
        info!(cancelled, "idle queue reset");
        cancelled
    }

    /// True when idle submissions from the calling thread currently run
    /// inline.
    pub fn is_synchronous(&self) -> bool {
        self.inner.config.synchronous || self.sync_depth() > 0
    }

    /// Open a synchronous window on the calling thread that lasts until the
    /// guard is dropped.
    pub fn synchronous_window(&self) -> SynchronousWindow<'_> {
        let thread = thread::current().id();
        *lock(&self.inner.sync_windows).entry(thread).or_insert(0) += 1;
        SynchronousWindow { scheduler: self, thread }
    }
}
