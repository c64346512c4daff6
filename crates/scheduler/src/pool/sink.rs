use std::fmt;
use std::sync::{Arc, Mutex};

use lull_core::{Priority, TaskId};
use tracing::debug;

use crate::clock::Clock;
use crate::lock;
use crate::queue::TaskQueue;
use crate::task::{IdleAction, Task};

/// Where workers post continuations. Implementations must hand the action
/// to the idle thread; it must never run on the calling worker.
pub trait ContinuationSink: Send + Sync + fmt::Debug {
    fn post(&self, origin: TaskId, name: Option<String>, priority: Priority, action: IdleAction);
}

/// Posts continuations straight onto the idle task queue, due immediately.
#[derive(Debug, Clone)]
pub struct IdleQueueSink {
    queue: Arc<Mutex<TaskQueue>>,
    clock: Arc<dyn Clock>,
}

impl IdleQueueSink {
    pub fn new(queue: Arc<Mutex<TaskQueue>>, clock: Arc<dyn Clock>) -> Self {
        Self { queue, clock }
    }
}

impl ContinuationSink for IdleQueueSink {
    fn post(&self, origin: TaskId, name: Option<String>, priority: Priority, action: IdleAction) {
        let task = Task::from_boxed(action, name, self.clock.now()).with_priority(priority);
        let id = lock(&self.queue).push(task).id();
        debug!(origin = %origin, continuation = %id, "queued continuation");
    }
}
