use thiserror::Error;

use lull_core::ConfigError;

/// Errors returned by scheduler submission and construction.
///
/// Failures inside task bodies are never reported here; they are contained
/// at the task boundary and surface as [`TaskFailure`](lull_core::TaskFailure).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("background queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("worker pool is shutting down")]
    ShuttingDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
