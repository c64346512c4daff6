use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use lull_core::{Priority, TaskFailure};
use tracing::debug;

use crate::lock;
use crate::task::{guarded, IdleAction, IdleOptions, Task, TaskHandle};

use super::core::{Inner, Scheduler};

/// Pause between ticks while blocking.
const PUMP_INTERVAL: Duration = Duration::from_millis(1);

/// A condition-gated idle action. Each poll runs as its own unnamed idle
/// task reporting under `outer`, the only handle the caller sees.
struct Gate<C> {
    scheduler: Weak<Inner>,
    outer: TaskHandle,
    priority: Priority,
    condition: C,
    action: IdleAction,
}

impl<C> Gate<C>
where
    C: FnMut() -> bool + Send + 'static,
{
    fn into_task(self, earliest: Instant) -> Task {
        let priority = self.priority;
        let owner = self.outer.clone();
        Task::from_boxed(Box::new(move || self.poll()), None, earliest)
            .with_priority(priority)
            .polling_for(owner)
    }

    fn poll(mut self) -> anyhow::Result<()> {
        if self.outer.cancel_requested() {
            self.outer.cancel();
            return Ok(());
        }

        let ready = match guarded(|| Ok((self.condition)())) {
            Ok(ready) => ready,
            Err(failure) => return self.fail(failure),
        };

        if !ready {
            // Scheduler gone: nothing left to poll on.
            let Some(inner) = self.scheduler.upgrade() else {
                return Ok(());
            };
            let next = inner.clock.now() + inner.config.condition_poll();
            lock(&inner.queue).push(self.into_task(next));
            return Ok(());
        }

        if !self.outer.begin() {
            return Ok(());
        }
        debug!(task = %self.outer.id(), name = self.outer.label(), "condition met; running idle task");
        let result = guarded(self.action);
        self.outer.finish(&result);
        result.map_err(anyhow::Error::from)
    }

    fn fail(self, failure: TaskFailure) -> anyhow::Result<()> {
        if self.outer.begin() {
            self.outer.finish::<()>(&Err(failure.clone()));
        }
        Err(failure.into())
    }
}

impl Scheduler {
    /// Run `action` on the idle thread once `condition` holds.
    ///
    /// The condition is evaluated on the idle thread, first after
    /// `options.after` and then every `condition_poll_ms`, until it returns
    /// true or the returned handle is cancelled. Only the priority, delay and
    /// name options apply. A panicking condition fails the task.
    pub fn idle_when<C, F>(&self, condition: C, action: F, options: IdleOptions) -> TaskHandle
    where
        C: FnMut() -> bool + Send + 'static,
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let outer = TaskHandle::new(options.name.clone());
        self.track(&outer, false);

        let gate = Gate {
            scheduler: Arc::downgrade(&self.inner),
            outer: outer.clone(),
            priority: options.priority.unwrap_or(self.inner.config.default_priority),
            condition,
            action: Box::new(action),
        };
        let task = gate.into_task(self.inner.clock.now() + options.after);

        if self.is_synchronous() && options.after.is_zero() {
            self.run_inline(task);
        } else {
            lock(&self.inner.queue).push(task);
        }
        debug!(task = %outer.id(), name = outer.label(), "queued conditional idle task");
        outer
    }

    /// Run `action` on the idle thread once every task in `handles` has
    /// finished, whichever way it finished.
    pub fn wait<I, F>(&self, handles: I, action: F) -> TaskHandle
    where
        I: IntoIterator<Item = TaskHandle>,
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let handles: Vec<TaskHandle> = handles.into_iter().collect();
        self.idle_when(
            move || handles.iter().all(TaskHandle::is_finished),
            action,
            IdleOptions::default(),
        )
    }

    /// Keep ticking on the calling thread for `duration` of wall time.
    pub fn block(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            self.tick_default();
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(PUMP_INTERVAL.min(deadline - now));
        }
    }

    /// Tick until `done` returns true or `timeout` of wall time passes.
    /// Returns whether `done` was satisfied.
    pub fn run_until<P>(&self, timeout: Duration, mut done: P) -> bool
    where
        P: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick_default();
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(PUMP_INTERVAL);
        }
    }
}
