//! Obtains CLOB API credentials for the wallet in `POLYMARKET_PRIVATE_KEY`.
//!
//! The credentials are printed as shell exports for the environment of
//! `updown-arb run --mode live`. The secret and passphrase are masked unless
//! `--show-secret` is given.

use anyhow::Result;
use clap::Args;
use std::time::Duration;
use tracing::info;
use updown_polymarket::clob::auth::{API_KEY_ENV, API_SECRET_ENV, PASSPHRASE_ENV};
use updown_polymarket::clob::{ApiCredentials, ClobClient, Wallet};

use super::ConfigArgs;

#[derive(Args, Debug, Clone)]
pub struct DeriveKeyArgs {
    /// Print the secret and passphrase in full
    #[arg(long)]
    pub show_secret: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

pub async fn run(args: DeriveKeyArgs) -> Result<()> {
    let config = args.config.load()?;
    let wallet = Wallet::from_env(config.clob.chain_id)?;
    info!(address = %wallet.address(), "deriving API credentials");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.clob.timeout_secs.max(10)))
        .build()?;
    let credentials = ClobClient::derive_api_key(&http, &config.clob.host, &wallet).await?;

    for line in export_lines(&credentials, args.show_secret) {
        println!("{line}");
    }
    Ok(())
}

fn export_lines(credentials: &ApiCredentials, show_secret: bool) -> [String; 3] {
    let reveal = |value: &str| {
        if show_secret {
            value.to_string()
        } else {
            mask(value)
        }
    };
    [
        format!("export {API_KEY_ENV}={}", credentials.api_key),
        format!("export {API_SECRET_ENV}={}", reveal(&credentials.secret)),
        format!("export {PASSPHRASE_ENV}={}", reveal(&credentials.passphrase)),
    ]
}

/// Keeps the first four characters.
fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    format!("{visible}****")
}
