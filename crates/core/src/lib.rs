pub mod config;
pub mod error;
pub mod task;

pub use config::{FullPolicy, SchedulerConfig};
pub use error::ConfigError;
pub use task::{Priority, TaskFailure, TaskId, TaskState};
