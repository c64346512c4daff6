use std::path::Path;

use tracing::debug;

use crate::error::ConfigError;

use super::types::{FullPolicy, SchedulerConfig};

impl SchedulerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Build config from defaults plus environment variables.
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `LULL_KEY` overrides `key`.
    /// - `LULL_WORKER_THREADS` -> `worker_threads`
    /// - `LULL_QUEUE_CAPACITY` -> `queue_capacity` (empty or `unbounded` clears it)
    /// - `LULL_FULL_POLICY` -> `full_policy` (`block` | `reject`)
    /// - `LULL_TICK_BUDGET_MS` -> `tick_budget_ms`
    /// - `LULL_DEFAULT_PRIORITY` -> `default_priority`
    /// - `LULL_CONDITION_POLL_MS` -> `condition_poll_ms`
    /// - `LULL_FAILURE_HISTORY` -> `failure_history`
    /// - `LULL_SYNCHRONOUS` -> `synchronous`
    /// - `LULL_THREAD_NAME_PREFIX` -> `thread_name_prefix`
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are
    /// ignored and logged.
    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LULL_WORKER_THREADS") {
            parse_into(&mut self.worker_threads, "LULL_WORKER_THREADS", &v);
        }
        if let Some(v) = lookup("LULL_QUEUE_CAPACITY") {
            match v.trim() {
                "" | "unbounded" => self.queue_capacity = None,
                s => match s.parse::<usize>() {
                    Ok(cap) => self.queue_capacity = Some(cap),
                    Err(_) => debug!(key = "LULL_QUEUE_CAPACITY", value = %v, "ignoring unparseable override"),
                },
            }
        }
        if let Some(v) = lookup("LULL_FULL_POLICY") {
            match v.trim().to_ascii_lowercase().as_str() {
                "block" => self.full_policy = FullPolicy::Block,
                "reject" => self.full_policy = FullPolicy::Reject,
                _ => debug!(key = "LULL_FULL_POLICY", value = %v, "ignoring unknown policy"),
            }
        }
        if let Some(v) = lookup("LULL_TICK_BUDGET_MS") {
            parse_into(&mut self.tick_budget_ms, "LULL_TICK_BUDGET_MS", &v);
        }
        if let Some(v) = lookup("LULL_DEFAULT_PRIORITY") {
            parse_into(&mut self.default_priority.0, "LULL_DEFAULT_PRIORITY", &v);
        }
        if let Some(v) = lookup("LULL_CONDITION_POLL_MS") {
            parse_into(&mut self.condition_poll_ms, "LULL_CONDITION_POLL_MS", &v);
        }
        if let Some(v) = lookup("LULL_FAILURE_HISTORY") {
            parse_into(&mut self.failure_history, "LULL_FAILURE_HISTORY", &v);
        }
        if let Some(v) = lookup("LULL_SYNCHRONOUS") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.synchronous = true,
                "0" | "false" | "no" | "off" => self.synchronous = false,
                _ => debug!(key = "LULL_SYNCHRONOUS", value = %v, "ignoring unparseable override"),
            }
        }
        if let Some(v) = lookup("LULL_THREAD_NAME_PREFIX") {
            self.thread_name_prefix = v;
        }
    }
}

fn parse_into<T: std::str::FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => debug!(key, value = %raw, "ignoring unparseable override"),
    }
}
