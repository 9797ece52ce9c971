use std::path::PathBuf;

use clap::Parser;
use harvester_core::RunRequest;

use crate::config::DEFAULT_CONFIG_FILE;

/// Incremental harvester: pulls changed records from the research information
/// API and emits graph change fragments for the triple store loader.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the RON configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Pull everything again instead of only what changed since the last run
    #[arg(long, conflicts_with = "reprocess")]
    pub full: bool,

    /// Rebuild output from the raw cache without contacting the API
    #[arg(long)]
    pub reprocess: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write the log to this file (overrides the configuration)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn request(&self) -> RunRequest {
        if self.full {
            RunRequest::FullPull
        } else if self.reprocess {
            RunRequest::Reprocess
        } else {
            RunRequest::Delta
        }
    }
}
