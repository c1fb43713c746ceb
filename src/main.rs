//! Forgeloop CLI entry point.

use anyhow::Context;
use clap::Parser;

use forgeloop::cli::{Cli, Commands};
use forgeloop::infrastructure::config::ConfigLoader;
use forgeloop::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => forgeloop::cli::handle_error(err, cli.json),
    };

    let logger = LogConfig::try_from(&config.logging)
        .and_then(|log_config| LoggerImpl::init(&log_config))
        .context("Failed to initialize logging");
    let _logger = match logger {
        Ok(logger) => logger,
        Err(err) => forgeloop::cli::handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Run(args) => forgeloop::cli::commands::run::execute(args, config, cli.json).await,
        Commands::Resume(args) => forgeloop::cli::commands::resume::execute(args, config, cli.json).await,
        Commands::Status(args) => forgeloop::cli::commands::status::execute(args, config, cli.json).await,
        Commands::Knowledge(args) => forgeloop::cli::commands::knowledge::execute(args, config, cli.json).await,
    };

    if let Err(err) = result {
        forgeloop::cli::handle_error(err, cli.json);
    }
}
