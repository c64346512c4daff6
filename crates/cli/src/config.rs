use anyhow::{Context, Result};
use tracing::info;

use lull_scheduler::SchedulerConfig;

use crate::cli::CliArgs;

/// Resolve the scheduler config: file or environment, then command-line overrides.
pub fn load(args: &CliArgs) -> Result<SchedulerConfig> {
    let mut config = match &args.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SchedulerConfig::from_env().context("failed to read config from environment")?,
    };

    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }
    config.validate().context("invalid scheduler config")?;

    info!(
        workers = config.resolved_worker_threads(),
        tick_budget_ms = config.tick_budget_ms,
        queue_capacity = ?config.queue_capacity,
        "config loaded"
    );
    Ok(config)
}
