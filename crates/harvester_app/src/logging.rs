//! Process logging for the harvester binary.
//!
//! Always logs to the terminal; a log file from the command line or the
//! configuration adds a file destination.

use std::path::Path;

use engine_logging::LogDestination;
use log::LevelFilter;

use crate::cli::Cli;

pub fn initialize(cli: &Cli, configured_file: Option<&Path>) {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let file = cli.log_file.as_deref().or(configured_file);
    let destination = match file {
        Some(_) => LogDestination::Both,
        None => LogDestination::Terminal,
    };
    engine_logging::initialize(destination, level, file);
}
