use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::Args;
use rust_decimal::Decimal;
use updown_core::Asset;
use updown_polymarket::{window_start, GammaClient};

use super::ConfigArgs;

#[derive(Args, Debug, Clone)]
pub struct WindowsArgs {
    /// Assets to look up (comma-separated, e.g. "btc,eth"). Defaults to the configured assets.
    #[arg(long)]
    pub assets: Option<String>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

impl WindowsArgs {
    pub fn parsed_assets(&self) -> Result<Option<Vec<Asset>>> {
        let Some(raw) = &self.assets else {
            return Ok(None);
        };
        let assets = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<Asset>().map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>>>()?;
        if assets.is_empty() {
            return Err(anyhow!("No assets given. Use --assets btc,eth,sol,xrp"));
        }
        Ok(Some(assets))
    }
}

pub async fn run(args: WindowsArgs) -> Result<()> {
    let config = args.config.load()?;
    let assets = args.parsed_assets()?.unwrap_or(config.assets);

    let gamma = GammaClient::new()
        .with_base_url(config.clob.gamma_url.clone())
        .with_timeout(config.clob.timeout());
    let now = Utc::now();
    let windows = gamma.discover(&assets, now).await;

    println!();
    println!("{}", "=".repeat(96));
    println!("WINDOWS  (current start {})", window_start(now));
    println!("{}", "=".repeat(96));
    println!(
        "{:<34} {:>6} {:>20} {:>9} {:>8} {:>8}",
        "Window", "Asset", "Start (UTC)", "Left (s)", "Up", "Down"
    );
    println!("{}", "-".repeat(96));
    for window in &windows {
        println!(
            "{:<34} {:>6} {:>20} {:>9} {:>8} {:>8}",
            window.id,
            window.asset.to_string(),
            window.start.format("%Y-%m-%d %H:%M:%S"),
            (window.end - now).num_seconds(),
            price(window.up_price),
            price(window.down_price),
        );
        println!("    up   token {}", window.up_token_id);
        println!("    down token {}", window.down_token_id);
    }
    if windows.is_empty() {
        println!("No windows found for {assets:?}");
    }
    println!();
    Ok(())
}

fn price(value: Option<Decimal>) -> String {
    value.map_or_else(|| "-".to_string(), |p| format!("{:.3}", p))
}
