//! The `harvester` command: configuration, logging setup and the run orchestrator.
pub mod cli;
pub mod config;
pub mod logging;
pub mod run;

pub use cli::Cli;
pub use config::{HarvesterConfig, DEFAULT_CONFIG_FILE};
pub use run::{run_harvest, RunSummary};
