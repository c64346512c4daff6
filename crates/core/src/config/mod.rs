//! Scheduler configuration.
//!
//! Parsed from TOML (`from_toml`, `from_file`) or built from the process
//! environment (`from_env`). In every case `LULL_*` environment overrides
//! are applied after parsing and the result is validated.

mod loading;
mod types;
mod validation;
#[cfg(test)]
mod tests;

pub use types::{FullPolicy, SchedulerConfig};
