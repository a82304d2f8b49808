//! Engine runner command.
//!
//! Wires spot feeds, the reference tracker, the odds sources, the executor
//! and the lifecycle together, then runs the engine loops until Ctrl+C or
//! until `--duration` elapses.
//!
//! # Usage
//!
//! ```bash
//! # Paper trading for one hour
//! updown-arb run --mode paper --duration 1h
//!
//! # Live trading with the `live` profile overlay
//! updown-arb run --mode live --profile live --log-file updown.log
//! ```

use anyhow::Result;
use clap::Args;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use updown_core::{AppConfig, EventSink, PositionStore, PriceFeed, TracingEventSink};
use updown_engine::{
    DailyRiskGate, EngineRunner, ExitRules, GammaQuoteCache, JsonPositionStore, LifecycleEngine,
    OddsAggregator, QuoteSource, ReferenceTracker, RunnerParts,
};
use updown_polymarket::clob::{OrderExecutor, PaperExecutor, PaperExecutorConfig};
use updown_polymarket::{
    BinanceFeed, BinanceFeedConfig, CoinbaseFeed, GammaClient, PolymarketClient, QuoteStream,
    QuoteStreamConfig, SpotPriceStore,
};

use super::{live_client, parse_duration, ConfigArgs};

/// Trading execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Paper,
    Live,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paper" => Ok(ExecutionMode::Paper),
            "live" => Ok(ExecutionMode::Live),
            _ => Err(format!("Invalid mode '{s}'. Valid options: paper, live")),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Paper => write!(f, "paper"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Execution mode: paper or live
    #[arg(long, default_value = "paper")]
    pub mode: String,

    /// Stop after this long (e.g. 30m, 4h, 1d). Runs until Ctrl+C when absent.
    #[arg(long)]
    pub duration: Option<String>,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<String>,
}

impl RunArgs {
    pub fn execution_mode(&self) -> Result<ExecutionMode> {
        ExecutionMode::from_str(&self.mode).map_err(|e| anyhow::anyhow!(e))
    }

    pub fn parsed_duration(&self) -> Result<Option<Duration>> {
        self.duration.as_deref().map(parse_duration).transpose()
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let mode = args.execution_mode()?;
    let duration = args.parsed_duration()?;
    let config = args.config.load()?;

    info!(
        mode = %mode,
        duration = ?duration,
        config = %args.config.config,
        profile = ?args.config.profile,
        assets = ?config.assets,
        "Starting up/down engine"
    );

    let executor: Arc<dyn OrderExecutor> = match mode {
        ExecutionMode::Paper => {
            let paper = PaperExecutorConfig::with_balance(config.paper.starting_balance)
                .fill_rate(config.paper.fill_rate)
                .partial_fill_rate(config.paper.partial_fill_rate);
            Arc::new(PaperExecutor::new(paper))
        }
        ExecutionMode::Live => Arc::new(live_client(&config)?),
    };

    run_with_executor(config, executor, duration).await
}

async fn run_with_executor(
    config: AppConfig,
    executor: Arc<dyn OrderExecutor>,
    duration: Option<Duration>,
) -> Result<()> {
    let (shutdown, _) = broadcast::channel::<()>(8);
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);

    // Spot feeds
    let spot_max_age = config.tracker.spot_max_age();
    let binance_store = Arc::new(SpotPriceStore::new("binance", spot_max_age));
    let coinbase_store = Arc::new(SpotPriceStore::new("coinbase", spot_max_age));

    let binance = BinanceFeed::new(
        BinanceFeedConfig {
            base_url: config.tracker.binance_ws_url.clone(),
            assets: config.assets.clone(),
            ..Default::default()
        },
        Arc::clone(&binance_store),
    );
    let coinbase = CoinbaseFeed::new(
        config.assets.clone(),
        Duration::from_millis(config.tracker.coinbase_poll_ms),
        Arc::clone(&coinbase_store),
    )
    .with_base_url(config.tracker.coinbase_api_url.clone());

    let mut feed_tasks = Vec::new();
    let rx = shutdown.subscribe();
    feed_tasks.push(tokio::spawn(async move { binance.run(rx).await }));
    let rx = shutdown.subscribe();
    feed_tasks.push(tokio::spawn(async move { coinbase.run(rx).await }));

    let tracker = Arc::new(ReferenceTracker::new(
        config.tracker.clone(),
        vec![
            binance_store as Arc<dyn PriceFeed>,
            coinbase_store as Arc<dyn PriceFeed>,
        ],
        Arc::clone(&events),
    ));

    // Odds: push stream first, then the CLOB midpoint, then the Gamma snapshot
    let stream = Arc::new(QuoteStream::spawn(QuoteStreamConfig {
        url: config.clob.ws_url.clone(),
        stale_after: Duration::from_secs(config.odds.push_stale_secs),
        ..Default::default()
    }));
    let midpoint = Arc::new(
        PolymarketClient::new()
            .with_base_url(config.clob.host.clone())
            .with_timeout(config.clob.timeout()),
    );
    let cache = Arc::new(GammaQuoteCache::new(Duration::from_secs(
        config.odds.cache_stale_secs,
    )));
    let odds = Arc::new(OddsAggregator::new(
        vec![
            Arc::clone(&stream) as Arc<dyn QuoteSource>,
            midpoint as Arc<dyn QuoteSource>,
            Arc::clone(&cache) as Arc<dyn QuoteSource>,
        ],
        Duration::from_secs(config.odds.cache_stale_secs),
    ));

    let gamma = Arc::new(
        GammaClient::new()
            .with_base_url(config.clob.gamma_url.clone())
            .with_timeout(config.clob.timeout()),
    );

    // Lifecycle, restoring positions left open by a previous run
    let store = Arc::new(JsonPositionStore::new(&config.store.positions_path));
    let lifecycle = Arc::new(LifecycleEngine::new(
        config.lifecycle.clone(),
        ExitRules::new(config.exit.clone()),
        Arc::clone(&executor),
        Arc::new(DailyRiskGate::new(config.risk.clone())),
        Arc::clone(&store) as Arc<dyn PositionStore>,
        Arc::clone(&events),
    ));
    match store.load_open() {
        Ok(open) if !open.is_empty() => {
            let restored = lifecycle.restore(open);
            info!(restored, path = %store.path().display(), "Restored open positions");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not read position store, starting empty"),
    }

    let runner = Arc::new(EngineRunner::new(
        &config,
        RunnerParts {
            tracker,
            odds,
            cache,
            stream: Some(stream),
            windows: gamma.clone(),
            lifecycle,
            resolver: gamma,
            executor,
            events,
        },
    ));

    // Duration timer
    if let Some(duration) = duration {
        let stop = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            info!("Duration elapsed, stopping...");
            let _ = stop.send(());
        });
    }

    // Ctrl+C handler
    let stop = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down...");
            let _ = stop.send(());
        }
    });

    let (runner_stats, lifecycle_stats) = Arc::clone(&runner).run(shutdown.clone()).await;

    // Loops are down; make sure the feeds follow
    let _ = shutdown.send(());
    for task in feed_tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "spot feed task failed");
        }
    }

    info!(
        window_scans = runner_stats.window_scans,
        rejections = ?runner_stats.rejections,
        entries_attempted = lifecycle_stats.entries_attempted,
        fill_rate = format!("{:.1}%", lifecycle_stats.fill_rate() * 100.0),
        wins = lifecycle_stats.wins,
        losses = lifecycle_stats.losses,
        realized_pnl = %lifecycle_stats.realized_pnl,
        open_positions = runner.lifecycle().open_positions().len(),
        "Session summary"
    );
    if let Ok(json) = serde_json::to_string_pretty(&runner_stats) {
        println!("{json}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_mode_parse() {
        assert_eq!(ExecutionMode::from_str("paper").unwrap(), ExecutionMode::Paper);
        assert_eq!(ExecutionMode::from_str("LIVE").unwrap(), ExecutionMode::Live);
        assert!(ExecutionMode::from_str("dry").is_err());
    }

    #[test]
    fn test_execution_mode_display_round_trips() {
        for mode in [ExecutionMode::Paper, ExecutionMode::Live] {
            assert_eq!(ExecutionMode::from_str(&mode.to_string()).unwrap(), mode);
        }
    }

    #[test]
    fn test_run_args_duration_is_optional() {
        let args = RunArgs {
            mode: "paper".to_string(),
            duration: None,
            config: ConfigArgs {
                config: "config/updown.toml".to_string(),
                profile: None,
            },
            log_file: None,
        };
        assert_eq!(args.parsed_duration().unwrap(), None);
        assert_eq!(args.execution_mode().unwrap(), ExecutionMode::Paper);

        let timed = RunArgs {
            duration: Some("90m".to_string()),
            ..args
        };
        assert_eq!(
            timed.parsed_duration().unwrap(),
            Some(Duration::from_secs(5400))
        );
    }
}
