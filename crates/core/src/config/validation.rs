use crate::error::ConfigError;

use super::types::SchedulerConfig;

impl SchedulerConfig {
    /// Validate the config: reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1 (omit it for an unbounded queue)".into(),
            ));
        }
        if self.tick_budget_ms == 0 {
            return Err(ConfigError::Invalid("tick_budget_ms must be > 0".into()));
        }
        if self.condition_poll_ms == 0 {
            return Err(ConfigError::Invalid("condition_poll_ms must be > 0".into()));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("thread_name_prefix must not be empty".into()));
        }
        Ok(())
    }
}
