use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use engine_logging::{engine_error, engine_info};
use harvester_app::{logging, run_harvest, Cli, HarvesterConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match HarvesterConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            logging::initialize(&cli, None);
            engine_error!("{err:#}");
            return ExitCode::FAILURE;
        }
    };
    logging::initialize(&cli, config.log_file.as_deref());
    config.log_ignored_settings();
    engine_info!(
        "harvester {} starting against {}",
        env!("CARGO_PKG_VERSION"),
        config.api_endpoint
    );

    let Some(translator) = config.translator() else {
        engine_error!("translate_command is required");
        return ExitCode::FAILURE;
    };
    engine_info!("translating items with {}", translator.program().display());

    match run_harvest(&config, Arc::new(translator), cli.request(), chrono::Utc::now()).await {
        Ok(summary) => {
            engine_info!(
                "run {} ({}) finished: {} entries, +{} / -{} statements, {} fragments",
                summary.run_count,
                summary.classification,
                summary.entries,
                summary.diff.additions,
                summary.diff.subtractions,
                summary.fragments
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            engine_error!("run failed: {err}");
            ExitCode::FAILURE
        }
    }
}
