//! Task descriptions, shared task handles and submission options.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lull_core::{Priority, TaskFailure, TaskId, TaskState};

/// Callable body of an idle task. Bound arguments are captured by the closure.
pub type IdleAction = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Label used in logs and metrics for tasks submitted without a name.
pub(crate) const ANONYMOUS: &str = "<anonymous>";

// ── TaskHandle ───────────────────────────────────────────────────────

#[derive(Debug)]
struct TaskShared {
    id: TaskId,
    name: Option<String>,
    state: AtomicU8,
    cancel_requested: AtomicBool,
}

/// Shared view of a task's identity and lifecycle.
///
/// Handles are cheap to clone and may be used from any thread. The state
/// and the cancellation flag are the only parts of a task that more than
/// one thread ever touches; both are atomics.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub(crate) fn new(name: Option<String>) -> Self {
        Self {
            shared: Arc::new(TaskShared {
                id: TaskId::new(),
                name,
                state: AtomicU8::new(TaskState::Pending as u8),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_repr(self.shared.state.load(Ordering::Acquire)).unwrap_or(TaskState::Pending)
    }

    /// True once the task has reached `Completed`, `Failed` or `Cancelled`.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// True if the task was cancelled before it started.
    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// True if cancellation was requested, whether or not it took effect.
    pub fn cancel_requested(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::Acquire)
    }

    /// Request cancellation.
    ///
    /// Returns `true` if the task is now guaranteed never to start. A task
    /// that is already running is not interrupted and `false` is returned.
    pub fn cancel(&self) -> bool {
        self.shared.cancel_requested.store(true, Ordering::Release);
        self.transition(TaskState::Pending, TaskState::Cancelled)
    }

    /// Claim the task for execution. Fails if it was cancelled.
    pub(crate) fn begin(&self) -> bool {
        if self.cancel_requested() {
            self.transition(TaskState::Pending, TaskState::Cancelled);
            return false;
        }
        self.transition(TaskState::Pending, TaskState::Running)
    }

    pub(crate) fn finish<T>(&self, result: &Result<T, TaskFailure>) {
        let next = if result.is_ok() {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        self.transition(TaskState::Running, next);
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        debug_assert!(from.can_transition_to(to));
        self.shared
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn label(&self) -> &str {
        self.name().unwrap_or(ANONYMOUS)
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TaskHandle {}

// ── Task ─────────────────────────────────────────────────────────────

/// One unit of deferred idle work plus its scheduling metadata.
pub struct Task {
    pub(crate) handle: TaskHandle,
    pub(crate) action: IdleAction,
    pub(crate) priority: Priority,
    pub(crate) earliest: Instant,
    pub(crate) timeout: Option<Duration>,
    pub(crate) expires_at: Option<Instant>,
    /// Handle the outcome is reported under, when this task polls on
    /// behalf of a gated task.
    pub(crate) owner: Option<TaskHandle>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.handle.id())
            .field("name", &self.handle.name())
            .field("state", &self.handle.state())
            .field("priority", &self.priority)
            .field("earliest", &self.earliest)
            .field("timeout", &self.timeout)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Task {
    /// Create a task that may run at or after `earliest`.
    pub fn new<F>(action: F, earliest: Instant) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self::from_boxed(Box::new(action), None, earliest)
    }

    pub(crate) fn from_boxed(action: IdleAction, name: Option<String>, earliest: Instant) -> Self {
        Self {
            handle: TaskHandle::new(name),
            action,
            priority: Priority::DEFAULT,
            earliest,
            timeout: None,
            expires_at: None,
            owner: None,
        }
    }

    /// Create a named task.
    pub fn named<F>(name: impl Into<String>, action: F, earliest: Instant) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self::from_boxed(Box::new(action), Some(name.into()), earliest)
    }

    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Advisory run-time allowance; overruns are recorded, never enforced.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Drop the task instead of running it if it is still queued at `deadline`.
    pub fn expiring_at(mut self, deadline: Instant) -> Self {
        self.expires_at = Some(deadline);
        self
    }

    /// Report this task's outcome under `owner` instead of its own handle.
    pub(crate) fn polling_for(mut self, owner: TaskHandle) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn id(&self) -> TaskId {
        self.handle.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.handle.name()
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn earliest(&self) -> Instant {
        self.earliest
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Run a task body, containing both returned errors and panics.
pub(crate) fn guarded<T, F>(action: F) -> Result<T, TaskFailure>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure::error(err)),
        Err(payload) => Err(TaskFailure::from_panic(payload)),
    }
}

// ── Submission options ───────────────────────────────────────────────

/// What to do when a named idle task is submitted while another task with
/// the same name is still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Queue both.
    #[default]
    Allow,
    /// The new task takes the queued task's place (its priority, delay and
    /// position are kept); the queued task is cancelled.
    Replace,
    /// The new task is dropped and the queued one kept.
    Skip,
}

/// Options for [`Scheduler::enqueue_idle`](crate::Scheduler::enqueue_idle).
#[derive(Debug, Clone, Default)]
pub struct IdleOptions {
    pub(crate) priority: Option<Priority>,
    pub(crate) after: Duration,
    pub(crate) timeout: Option<Duration>,
    pub(crate) expire_after: Option<Duration>,
    pub(crate) name: Option<String>,
    pub(crate) duplicate: DuplicatePolicy,
}

impl IdleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower runs earlier. Defaults to the configured default priority.
    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Do not run before `delay` has elapsed.
    pub fn after(mut self, delay: Duration) -> Self {
        self.after = delay;
        self
    }

    /// Advisory run-time allowance.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Drop the task if it has not started within `ttl` of submission.
    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name the task and replace any queued task with the same key.
    pub fn coalesce(mut self, key: impl Into<String>) -> Self {
        self.name = Some(key.into());
        self.duplicate = DuplicatePolicy::Replace;
        self
    }

    /// Name the task and drop it if a task with the same key is queued.
    pub fn skip_if_queued(mut self, key: impl Into<String>) -> Self {
        self.name = Some(key.into());
        self.duplicate = DuplicatePolicy::Skip;
        self
    }
}

/// Options for [`Scheduler::enqueue_background`](crate::Scheduler::enqueue_background).
#[derive(Debug, Clone, Default)]
pub struct BackgroundOptions {
    pub(crate) priority: Option<Priority>,
    pub(crate) name: Option<String>,
}

impl BackgroundOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Priority given to the continuation on the idle queue.
    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_before_start_prevents_begin() {
        let handle = TaskHandle::new(None);
        assert!(handle.cancel());
        assert!(handle.is_cancelled());
        assert!(!handle.begin());
        assert_eq!(handle.state(), TaskState::Cancelled);
    }

    #[test]
    fn cancel_after_start_is_a_noop() {
        let handle = TaskHandle::new(Some("redraw".into()));
        assert!(handle.begin());
        assert!(!handle.cancel());
        assert!(handle.cancel_requested());
        assert_eq!(handle.state(), TaskState::Running);

        handle.finish::<()>(&Ok(()));
        assert_eq!(handle.state(), TaskState::Completed);
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn finished_state_never_regresses() {
        let handle = TaskHandle::new(None);
        assert!(handle.begin());
        handle.finish::<()>(&Err(TaskFailure::error("nope")));
        assert_eq!(handle.state(), TaskState::Failed);

        handle.finish::<()>(&Ok(()));
        assert!(!handle.cancel());
        assert_eq!(handle.state(), TaskState::Failed);
    }

    #[test]
    fn guarded_contains_errors_and_panics() {
        assert_eq!(guarded(|| Ok(3)), Ok(3));

        let err = guarded::<(), _>(|| Err(anyhow::anyhow!("bad input"))).unwrap_err();
        assert_eq!(err, TaskFailure::Error("bad input".into()));

        let err = guarded::<(), _>(|| panic!("kaboom")).unwrap_err();
        assert_eq!(err, TaskFailure::Panicked("kaboom".into()));
    }

    #[test]
    fn options_builders() {
        let opts = IdleOptions::new()
            .priority(3)
            .after(Duration::from_millis(40))
            .coalesce("redraw");
        assert_eq!(opts.priority, Some(Priority(3)));
        assert_eq!(opts.after, Duration::from_millis(40));
        assert_eq!(opts.name.as_deref(), Some("redraw"));
        assert_eq!(opts.duplicate, DuplicatePolicy::Replace);

        let opts = IdleOptions::new().skip_if_queued("refresh");
        assert_eq!(opts.duplicate, DuplicatePolicy::Skip);
    }
}
