use std::fmt;

use lull_core::{Priority, TaskFailure};

use crate::task::{guarded, IdleAction, TaskHandle};

/// Continuation invoked on the idle thread with a background action's result.
pub type Continuation<T> = Box<dyn FnOnce(Result<T, TaskFailure>) -> anyhow::Result<()> + Send + 'static>;

/// What a worker gets back from running a job.
pub(crate) struct JobOutcome {
    pub(crate) result: Result<(), TaskFailure>,
    pub(crate) continuation: Option<IdleAction>,
}

/// A background task ready for a worker: the type-erased action, the
/// handle shared with the submitter, and the priority its continuation
/// will be queued with.
pub struct Job {
    pub(crate) handle: TaskHandle,
    pub(crate) priority: Priority,
    work: Box<dyn FnOnce() -> JobOutcome + Send + 'static>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.handle.id())
            .field("name", &self.handle.name())
            .field("priority", &self.priority)
            .finish()
    }
}

impl Job {
    /// Wrap `action` under a fresh handle. When it finishes, `then` (if any)
    /// is packaged as an idle action carrying the value or the failure.
    pub fn new<T, F>(name: Option<String>, priority: Priority, action: F, then: Option<Continuation<T>>) -> Self
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let work = move || {
            let outcome = guarded(action);
            let result = match &outcome {
                Ok(_) => Ok(()),
                Err(failure) => Err(failure.clone()),
            };
            let continuation = then.map(|then| -> IdleAction { Box::new(move || then(outcome)) });
            JobOutcome { result, continuation }
        };
        Self {
            handle: TaskHandle::new(name),
            priority,
            work: Box::new(work),
        }
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub(crate) fn run(self) -> (TaskHandle, Priority, JobOutcome) {
        let outcome = (self.work)();
        (self.handle, self.priority, outcome)
    }
}
