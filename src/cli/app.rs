use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config};
use crate::config::LoadedConfig;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let loaded_config = load_config(cli.config.as_deref())?;
    let logging = &loaded_config.config.logging;
    let level = cli.log_level.clone().unwrap_or_else(|| logging.level.clone());
    init_logging(&level, cli.debug, cli.log_format.unwrap_or(logging.format))?;

    info!("Starting replaybook v{}", env!("CARGO_PKG_VERSION"));
    let LoadedConfig {
        config,
        path,
        from_file,
    } = loaded_config;
    if from_file {
        debug!(path = %path.display(), "configuration loaded");
    } else {
        debug!(path = %path.display(), "no config file, using defaults");
    }
    let cli_context = CliContext::new(config, path);

    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            debug!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {}", err);
            Err(err)
        }
    }
}
