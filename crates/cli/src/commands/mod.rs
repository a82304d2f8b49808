pub mod balance;
pub mod derive_key;
pub mod duration;
pub mod run;
pub mod windows;

pub use balance::BalanceArgs;
pub use derive_key::DeriveKeyArgs;
pub use duration::parse_duration;
pub use run::RunArgs;
pub use windows::WindowsArgs;

use anyhow::{anyhow, Result};
use clap::Args;
use std::sync::Arc;
use tracing::info;
use updown_core::config_loader::DEFAULT_CONFIG_PATH;
use updown_core::{AppConfig, ConfigLoader};
use updown_polymarket::clob::auth::{API_KEY_ENV, API_SECRET_ENV, PASSPHRASE_ENV};
use updown_polymarket::clob::{ApiCredentials, ClobClient, Domain, OrderBuilder, Wallet};

/// Config file and profile selection shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Profile overlay, e.g. `paper` loads `updown.paper.toml` beside the config
    #[arg(long)]
    pub profile: Option<String>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<AppConfig> {
        let mut loader = ConfigLoader::new(&self.config);
        if let Some(profile) = &self.profile {
            loader = loader.with_profile(profile);
        }
        Ok(loader.load()?)
    }
}

/// Authenticated CLOB client from `POLYMARKET_PRIVATE_KEY` and the
/// `POLY_*` API credentials.
pub fn live_client(config: &AppConfig) -> Result<ClobClient> {
    let wallet = Arc::new(Wallet::from_env(config.clob.chain_id)?);
    let credentials = ApiCredentials::from_env().ok_or_else(|| {
        anyhow!(
            "live trading needs {API_KEY_ENV}, {API_SECRET_ENV} and {PASSPHRASE_ENV}; \
             run `updown-arb derive-api-key` to obtain them"
        )
    })?;
    info!(address = %wallet.address(), chain_id = config.clob.chain_id, "wallet loaded");

    let domain = Domain::polymarket(config.clob.chain_id, config.clob.neg_risk)?;
    let builder =
        OrderBuilder::new(wallet, domain).with_fee_rate_bps(u64::from(config.clob.fee_rate_bps));
    let client = ClobClient::new(builder, credentials)?
        .with_base_url(config.clob.host.clone())
        .with_timeout(config.clob.timeout())?
        .with_rate_limit(config.clob.requests_per_minute);
    Ok(client)
}
