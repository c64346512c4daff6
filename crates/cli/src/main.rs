mod cli;
mod config;
mod demo;

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use lull_scheduler::Scheduler;

use crate::cli::CliArgs;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = config::load(&args)?;
    let scheduler = Scheduler::new(config).context("failed to start scheduler")?;
    scheduler.bind_idle_thread();

    let finished = demo::submit(&scheduler, args.tasks).context("failed to submit demo workload")?;

    // Host loop: tick at a fixed cadence, like a UI timer would.
    let cadence = Duration::from_millis(args.tick_ms);
    for tick in 0..args.ticks {
        let report = scheduler.tick_default();
        debug!(
            tick,
            ran = report.ran(),
            remaining = report.remaining,
            budget_exhausted = report.budget_exhausted,
            "tick"
        );
        if finished.is_finished() && scheduler.pending_idle() == 0 {
            info!(tick, "demo work complete");
            break;
        }
        thread::sleep(cadence);
    }

    scheduler.shutdown();
    // Continuations of jobs drained during shutdown.
    scheduler.tick_default();

    let metrics = scheduler.metrics();
    println!("{}", metrics.to_json().context("failed to serialize metrics")?);
    Ok(())
}
