pub mod cli;
pub mod core;
pub mod providers;

use crate::cli::simulate::SimulateOptions;
use crate::core::config::AppConfig;
use anyhow::Result;
use tracing::{debug, info};

pub enum AppCommand {
    Prices,
    Simulate(SimulateOptions),
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("xfund starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Prices => cli::prices::run(&config).await,
        AppCommand::Simulate(options) => cli::simulate::run(&config, &options).await,
    }
}
