use std::path::PathBuf;

use clap::Parser;

/// Simulated host event loop for the lull idle-task scheduler.
///
/// Submits a mix of idle, delayed, coalesced and background work, ticks the
/// scheduler at a fixed cadence and prints the final metrics as JSON.
#[derive(Parser, Debug)]
#[command(name = "lull-demo", about = "Drive the lull scheduler from a simulated event loop")]
pub struct CliArgs {
    /// Path to a scheduler config file (TOML). Defaults plus LULL_* env vars otherwise.
    #[arg(long, env = "LULL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of host loop iterations to run
    #[arg(long, default_value = "100")]
    pub ticks: u32,

    /// Milliseconds between ticks
    #[arg(long, default_value = "16")]
    pub tick_ms: u64,

    /// Background worker count override
    #[arg(long)]
    pub workers: Option<usize>,

    /// Number of idle tasks to submit
    #[arg(long, default_value = "24")]
    pub tasks: usize,
}
