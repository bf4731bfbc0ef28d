//! VelaCore wallet CLI - connect a wallet and drive the staking contracts
//!
//! Wallets are JSON-RPC endpoints listed under `[environment]` in the
//! configuration; they are presented to the registry the way a browser
//! would inject them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use velacore_wallet::cli::commands;
use velacore_wallet::config::Config;

/// VelaCore wallet and staking CLI
#[derive(Parser)]
#[command(name = "velacore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml", env = "VELACORE_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List wallets available in the configured environment
    Wallets,

    /// Connect a wallet
    Connect {
        /// Wallet id (see `velacore wallets`)
        wallet: String,

        /// Launch the wallet app and wait for it to inject its provider
        #[arg(long)]
        mobile: bool,
    },

    /// Show the connected account and dashboard
    Status,

    /// Disconnect and forget the last wallet
    Disconnect,

    /// Approve the staking contract to spend tokens
    Approve {
        /// Amount in tokens (e.g. "1.5")
        amount: String,
    },

    /// Stake tokens (approves first if needed)
    Stake {
        /// Amount in tokens (e.g. "1.5")
        amount: String,
    },

    /// Withdraw staked tokens
    Unstake {
        /// Amount in tokens (e.g. "1.5")
        amount: String,
    },

    /// Claim pending rewards
    Claim,

    /// Withdraw the whole stake immediately, forfeiting rewards
    EmergencyWithdraw {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Claim test tokens from the faucet
    Faucet,

    /// Show the activity log
    Logs {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("velacore_wallet=info".parse()?),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Wallets => commands::wallets(&config).await,
        Commands::Connect { wallet, mobile } => commands::connect(&config, &wallet, mobile).await,
        Commands::Status => commands::status(&config).await,
        Commands::Disconnect => commands::disconnect(&config).await,
        Commands::Approve { amount } => commands::approve(&config, &amount).await,
        Commands::Stake { amount } => commands::stake(&config, &amount).await,
        Commands::Unstake { amount } => commands::unstake(&config, &amount).await,
        Commands::Claim => commands::claim(&config).await,
        Commands::EmergencyWithdraw { force } => commands::emergency_withdraw(&config, force).await,
        Commands::Faucet => commands::faucet(&config).await,
        Commands::Logs { limit } => commands::logs(&config, limit).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
