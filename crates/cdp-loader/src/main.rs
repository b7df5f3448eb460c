//! CDP Loader - periodic competition results refresh

use anyhow::Result;
use cdp_common::logging::{init_logging, LogConfig, LogLevel};
use cdp_loader::{config::LoaderConfig, pipeline::LoaderPipeline, storage};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cdp-loader")]
#[command(author, version, about = "Bulk loader for competition results")]
struct Cli {
    /// Skip the whole load when the live results table already exists
    #[arg(short = 's', long)]
    skip_if_loaded: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Environment takes precedence over the baked-in defaults
    let log_config = LogConfig::from_env_or(LogConfig {
        level: LogLevel::Info,
        log_file_prefix: "cdp-loader".to_string(),
        ..LogConfig::default()
    })?;
    init_logging(&log_config)?;

    let mut config = LoaderConfig::load()?;
    config.skip_if_loaded = cli.skip_if_loaded;

    info!(url = %config.export_url, "Starting results load");

    let pool = storage::connect_with_retry(&config).await?;
    let pipeline = LoaderPipeline::new(config, pool);

    match pipeline.run().await {
        Ok(stats) if stats.skipped => {
            info!("Load skipped, live data left in place");
        },
        Ok(stats) => {
            info!(
                persons = stats.persons_loaded,
                results = stats.results_loaded,
                "Load finished"
            );
        },
        Err(err) => {
            error!(error = %err, "Results load failed");
            return Err(err.into());
        },
    }

    Ok(())
}
