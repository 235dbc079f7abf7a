use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use rust_decimal::Decimal;
use xfund::cli::simulate::SimulateOptions;
use xfund::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for xfund::AppCommand {
    fn from(cmd: Commands) -> xfund::AppCommand {
        match cmd {
            Commands::Prices => xfund::AppCommand::Prices,
            Commands::Simulate {
                deposit,
                weights,
                slippage,
            } => xfund::AppCommand::Simulate(SimulateOptions {
                deposit,
                weights,
                slippage_bps: slippage,
            }),
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Display every configured asset priced in the pivot and USD
    Prices,
    /// Invest into the configured fund and optionally rebalance it
    Simulate {
        /// Deposit in whole pivot units
        #[arg(short, long)]
        deposit: Decimal,

        /// New target weights in bps, one per configured constituent
        #[arg(short, long, value_delimiter = ',')]
        weights: Option<Vec<u64>>,

        /// Maximum slippage per trade in bps
        #[arg(short, long, default_value_t = 100)]
        slippage: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => xfund::cli::setup::setup(),
        Some(cmd) => xfund::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
