use clap::{Parser, Subcommand};

mod commands;

use commands::{BalanceArgs, DeriveKeyArgs, RunArgs, WindowsArgs};

#[derive(Parser)]
#[command(name = "updown-arb")]
#[command(about = "Latency arbitrage for 15-minute crypto up/down windows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine in paper or live mode
    Run(RunArgs),
    /// List the current windows and their quoted odds
    Windows(WindowsArgs),
    /// Show the collateral balance of the trading wallet
    Balance(BalanceArgs),
    /// Derive (or create) CLOB API credentials for the wallet
    DeriveApiKey(DeriveKeyArgs),
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(RunArgs {
            log_file: Some(path),
            ..
        }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(env_filter()).init();
        }
    }

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Windows(args) => commands::windows::run(args).await,
        Commands::Balance(args) => commands::balance::run(args).await,
        Commands::DeriveApiKey(args) => commands::derive_key::run(args).await,
    }
}
