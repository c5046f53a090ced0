//! Pool Sniper - new-pool detection and auto-sell risk engine
//!
//! # WARNING
//! - This bot trades with real money. Only use funds you can afford to lose.
//! - Most freshly created pools go to zero (rug pulls, abandonment).
//! - Paper fills do not model MEV competition or slippage under load.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use pool_sniper::cli::commands;
use pool_sniper::policy::Policy;

/// New-pool detection and auto-sell risk engine
#[derive(Parser)]
#[command(name = "pool-sniper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to policy file
    #[arg(short, long, default_value = "policy.toml")]
    config: String,

    /// Path to a venue spec file merged over the built-in vocabularies
    #[arg(long)]
    venues_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine, reading log batches from stdin
    Start {
        /// Run in dry-run mode (paper fills, no real trades)
        #[arg(long)]
        dry_run: bool,

        /// Use a named preset instead of the policy file
        #[arg(long)]
        preset: Option<String>,
    },

    /// Show the active policy (secrets masked)
    Config,

    /// List registered venue vocabularies
    Venues,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pool_sniper=info".parse().unwrap()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { dry_run, preset } => {
            let policy = match preset {
                Some(name) => Policy::preset(&name).map_err(anyhow::Error::from),
                None => load_policy(&cli.config),
            };
            match policy {
                Ok(policy) => {
                    commands::start(policy, cli.venues_file.as_deref(), dry_run).await
                }
                Err(e) => {
                    error!("Failed to load policy: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Config => match load_policy(&cli.config) {
            Ok(policy) => commands::show_config(&policy),
            Err(e) => {
                error!("Failed to load policy: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Venues => commands::venues(cli.venues_file.as_deref()).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Load the policy file, falling back to defaults when it does not exist
fn load_policy(path: &str) -> Result<Policy> {
    if std::path::Path::new(path).exists() {
        Policy::load(path)
    } else {
        tracing::warn!(path, "Policy file not found, using defaults");
        Ok(Policy::default())
    }
}
