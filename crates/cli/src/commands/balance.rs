use anyhow::Result;
use clap::Args;

use super::{live_client, ConfigArgs};

#[derive(Args, Debug, Clone)]
pub struct BalanceArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

pub async fn run(args: BalanceArgs) -> Result<()> {
    let config = args.config.load()?;
    let client = live_client(&config)?;
    let balance = client.collateral_balance().await?;
    println!("USDC balance: {balance}");
    Ok(())
}
