//! Periodic orchestration of the tracker, odds, edge model and lifecycle.
//!
//! Five independent loops drive the engine:
//!
//! | loop          | step                               |
//! |---------------|------------------------------------|
//! | windows       | discover windows, capture refs     |
//! | odds          | refresh aggregated quotes          |
//! | opportunities | evaluate edge, submit entries      |
//! | exits         | evaluate exit rules                |
//! | settlement    | settle, evict, refresh bankroll    |
//!
//! Each step is also public so it can be driven directly.

use crate::edge::{EdgeInput, EdgeModel, Rejection};
use crate::lifecycle::{
    EntryError, ExitReport, LifecycleEngine, LifecycleStats, MarketData, ResolutionSource,
    Settlement,
};
use crate::odds::{GammaQuoteCache, OddsAggregator};
use crate::reference::{CaptureOutcome, ReferenceTracker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use updown_core::{AppConfig, Asset, EngineEvent, EventSink, ScheduleConfig};
use updown_polymarket::clob::OrderExecutor;
use updown_polymarket::{window_start, GammaClient, MarketWindow, QuoteStream};

/// Where the runner learns about live windows.
#[async_trait]
pub trait WindowSource: Send + Sync {
    async fn discover(&self, assets: &[Asset], now: DateTime<Utc>) -> Vec<MarketWindow>;
}

#[async_trait]
impl WindowSource for GammaClient {
    async fn discover(&self, assets: &[Asset], now: DateTime<Utc>) -> Vec<MarketWindow> {
        GammaClient::discover(self, assets, now).await
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerStats {
    pub window_scans: u64,
    pub windows_discovered: u64,
    pub references_captured: u64,
    pub windows_skipped: u64,
    pub quotes_refreshed: u64,
    pub opportunities: u64,
    /// Rejection counts keyed by rejection code.
    pub rejections: BTreeMap<String, u64>,
    pub entries_opened: u64,
    pub exits: u64,
    pub settlements: u64,
    pub started_at: Option<DateTime<Utc>>,
}

/// Collaborators the runner drives.
pub struct RunnerParts {
    pub tracker: Arc<ReferenceTracker>,
    pub odds: Arc<OddsAggregator>,
    pub cache: Arc<GammaQuoteCache>,
    /// Push stream to subscribe discovered tokens on, if one is running.
    pub stream: Option<Arc<QuoteStream>>,
    pub windows: Arc<dyn WindowSource>,
    pub lifecycle: Arc<LifecycleEngine>,
    pub resolver: Arc<dyn ResolutionSource>,
    pub executor: Arc<dyn OrderExecutor>,
    pub events: Arc<dyn EventSink>,
}

pub struct EngineRunner {
    assets: Vec<Asset>,
    schedule: ScheduleConfig,
    edge: EdgeModel,
    tracker: Arc<ReferenceTracker>,
    odds: Arc<OddsAggregator>,
    cache: Arc<GammaQuoteCache>,
    stream: Option<Arc<QuoteStream>>,
    windows: Arc<dyn WindowSource>,
    lifecycle: Arc<LifecycleEngine>,
    resolver: Arc<dyn ResolutionSource>,
    executor: Arc<dyn OrderExecutor>,
    events: Arc<dyn EventSink>,
    bankroll: RwLock<Decimal>,
    stats: RwLock<RunnerStats>,
}

impl std::fmt::Debug for EngineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRunner")
            .field("assets", &self.assets)
            .field("bankroll", &*self.bankroll.read())
            .field("stats", &*self.stats.read())
            .finish_non_exhaustive()
    }
}

/// Live view handed to exit evaluation.
struct LiveMarket<'a> {
    odds: &'a OddsAggregator,
    tracker: &'a ReferenceTracker,
    now: DateTime<Utc>,
}

impl MarketData for LiveMarket<'_> {
    fn quote(&self, token_id: &str) -> Option<Decimal> {
        self.odds.latest(token_id).map(|q| q.price)
    }

    fn spot(&self, asset: Asset) -> Option<Decimal> {
        self.tracker.spot_price(asset, self.now)
    }
}

impl EngineRunner {
    pub fn new(config: &AppConfig, parts: RunnerParts) -> Self {
        Self {
            assets: config.assets.clone(),
            schedule: config.schedule.clone(),
            edge: EdgeModel::new(config.edge.clone()),
            tracker: parts.tracker,
            odds: parts.odds,
            cache: parts.cache,
            stream: parts.stream,
            windows: parts.windows,
            lifecycle: parts.lifecycle,
            resolver: parts.resolver,
            executor: parts.executor,
            events: parts.events,
            bankroll: RwLock::new(Decimal::ZERO),
            stats: RwLock::new(RunnerStats::default()),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<ReferenceTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<LifecycleEngine> {
        &self.lifecycle
    }

    #[must_use]
    pub fn bankroll(&self) -> Decimal {
        *self.bankroll.read()
    }

    #[must_use]
    pub fn stats(&self) -> RunnerStats {
        self.stats.read().clone()
    }

    /// Re-reads spendable balance from the executor.
    pub async fn refresh_bankroll(&self) -> Option<Decimal> {
        match self.executor.balance().await {
            Ok(balance) => {
                *self.bankroll.write() = balance;
                Some(balance)
            }
            Err(e) => {
                warn!(executor = self.executor.name(), error = %e, "balance refresh failed");
                None
            }
        }
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Discovers live windows, registers them with the tracker and arms the
    /// scheduled capture for the next window once it is close. Returns the
    /// number of windows discovered.
    pub async fn scan_windows(&self, now: DateTime<Utc>) -> usize {
        let discovered = self.windows.discover(&self.assets, now).await;

        let (mut captured, mut skipped) = (0u64, 0u64);
        for window in &discovered {
            self.cache.record(window, now);
            if let Some(stream) = &self.stream {
                stream.subscribe(&[window.up_token_id.clone(), window.down_token_id.clone()]);
            }
            match self.tracker.on_window_discovered(window, now) {
                CaptureOutcome::Captured { .. } => captured += 1,
                CaptureOutcome::Skipped => skipped += 1,
                CaptureOutcome::AlreadyCaptured(_) | CaptureOutcome::Pending => {}
            }
        }

        let config = self.tracker.config();
        let window_secs = i64::try_from(config.window_secs).unwrap_or(900);
        let lead = i64::try_from(config.capture_lead_secs).unwrap_or(0);
        let next_start = window_start(now) + window_secs;
        if next_start - now.timestamp() <= lead {
            for asset in &self.assets {
                self.tracker.schedule_capture(*asset, next_start, now);
            }
        }

        let mut stats = self.stats.write();
        stats.window_scans += 1;
        stats.windows_discovered += discovered.len() as u64;
        stats.references_captured += captured;
        stats.windows_skipped += skipped;
        discovered.len()
    }

    /// Refreshes quotes for every live, non-skipped window and hands them
    /// to the tracker. Returns the number of tokens that got a quote.
    pub async fn refresh_odds(&self, now: DateTime<Utc>) -> usize {
        let live: Vec<_> = self
            .tracker
            .snapshot()
            .into_iter()
            .filter(|s| !s.skipped && s.window.is_active(now))
            .collect();
        if live.is_empty() {
            return 0;
        }

        let tokens: Vec<String> = live
            .iter()
            .flat_map(|s| [s.window.up_token_id.clone(), s.window.down_token_id.clone()])
            .collect();
        let refreshed = self.odds.refresh(&tokens).await;

        for state in &live {
            let up = self.odds.latest(&state.window.up_token_id).map(|q| q.price);
            let down = self.odds.latest(&state.window.down_token_id).map(|q| q.price);
            self.tracker.update_odds(state.window_id(), up, down, now);
        }
        self.stats.write().quotes_refreshed += refreshed as u64;
        refreshed
    }

    /// Evaluates every tradeable window and submits accepted opportunities.
    /// Returns the positions opened.
    pub async fn scan_opportunities(&self, now: DateTime<Utc>) -> Vec<updown_core::Position> {
        let limits = self.lifecycle.config();
        let mut bankroll = self.bankroll();
        let mut opened = Vec::new();

        for state in self.tracker.snapshot() {
            if !state.is_tradeable(now) || state.entries >= limits.max_trades_per_window {
                continue;
            }
            if let Some(last) = state.last_entry {
                if (now - last).num_seconds() < limits.entry_cooldown_secs {
                    continue;
                }
            }

            let sources = self.tracker.fresh_prices(state.asset(), now);
            let Some(input) = EdgeInput::from_window(&state, sources, bankroll, now) else {
                continue;
            };
            let opportunity = match self.edge.evaluate(&input) {
                Ok(opportunity) => opportunity,
                Err(rejection) => {
                    self.record_rejection(state.window_id(), &rejection);
                    continue;
                }
            };

            self.stats.write().opportunities += 1;
            self.events.emit(&EngineEvent::OpportunityDetected {
                window_id: opportunity.window_id.clone(),
                outcome: opportunity.outcome,
                quoted: opportunity.quoted,
                fair: opportunity.fair,
                edge: opportunity.edge,
                confidence: opportunity.confidence,
            });

            match self.lifecycle.submit_opportunity(&opportunity, now).await {
                Ok(position) => {
                    self.tracker.record_entry(&position.window_id, now);
                    bankroll = (bankroll - position.cost_basis()).max(Decimal::ZERO);
                    self.stats.write().entries_opened += 1;
                    opened.push(position);
                }
                Err(e @ (EntryError::Blocked(_) | EntryError::RiskRejected(_))) => {
                    debug!(window = %opportunity.window_id, reason = %e, "entry not taken");
                }
                Err(e) => {
                    warn!(window = %opportunity.window_id, error = %e, "entry failed");
                }
            }
        }

        *self.bankroll.write() = bankroll;
        opened
    }

    fn record_rejection(&self, window_id: &str, rejection: &Rejection) {
        trace!(window = window_id, reason = %rejection.reason(), "no opportunity");
        *self
            .stats
            .write()
            .rejections
            .entry(rejection.code().to_string())
            .or_insert(0) += 1;
    }

    /// Refreshes quotes for held tokens and runs exit evaluation.
    pub async fn scan_exits(&self, now: DateTime<Utc>) -> Vec<ExitReport> {
        let held: Vec<String> = self
            .lifecycle
            .open_positions()
            .into_iter()
            .map(|p| p.token_id)
            .collect();
        if held.is_empty() {
            return Vec::new();
        }
        self.odds.refresh(&held).await;

        let market = LiveMarket {
            odds: &self.odds,
            tracker: &self.tracker,
            now,
        };
        let reports = self.lifecycle.evaluate_exits(&market, now).await;
        self.stats.write().exits += reports.len() as u64;
        reports
    }

    /// Settles resolved windows, evicts stale tracker state and refreshes
    /// the bankroll.
    pub async fn settle(&self, now: DateTime<Utc>) -> Vec<Settlement> {
        let settlements = self
            .lifecycle
            .settle_resolved(self.resolver.as_ref(), now)
            .await;

        let evicted = self.tracker.evict_expired(now);
        for state in &evicted {
            self.lifecycle.book().forget_window(&state.window.id);
        }
        if !evicted.is_empty() {
            let tokens: Vec<String> = evicted
                .iter()
                .flat_map(|s| [s.window.up_token_id.clone(), s.window.down_token_id.clone()])
                .collect();
            self.odds.forget(&tokens);
            self.cache.forget(&tokens);
            if let Some(stream) = &self.stream {
                stream.forget(&tokens);
            }
        }

        self.refresh_bankroll().await;
        self.stats.write().settlements += settlements.len() as u64;
        settlements
    }

    // =========================================================================
    // Loops
    // =========================================================================

    /// Runs every loop until `shutdown` fires, then returns the final stats.
    pub async fn run(
        self: Arc<Self>,
        shutdown: broadcast::Sender<()>,
    ) -> (RunnerStats, LifecycleStats) {
        self.stats.write().started_at = Some(Utc::now());
        let bankroll = self.refresh_bankroll().await;
        info!(
            assets = ?self.assets,
            executor = self.executor.name(),
            bankroll = ?bankroll,
            open_positions = self.lifecycle.open_positions().len(),
            "engine starting"
        );

        let handles = vec![
            spawn_loop("windows", self.schedule.capture_scan_ms, shutdown.subscribe(), {
                let runner = Arc::clone(&self);
                move || {
                    let runner = Arc::clone(&runner);
                    async move {
                        runner.scan_windows(Utc::now()).await;
                    }
                }
            }),
            spawn_loop("odds", self.schedule.odds_refresh_ms, shutdown.subscribe(), {
                let runner = Arc::clone(&self);
                move || {
                    let runner = Arc::clone(&runner);
                    async move {
                        runner.refresh_odds(Utc::now()).await;
                    }
                }
            }),
            spawn_loop(
                "opportunities",
                self.schedule.opportunity_scan_ms,
                shutdown.subscribe(),
                {
                    let runner = Arc::clone(&self);
                    move || {
                        let runner = Arc::clone(&runner);
                        async move {
                            runner.scan_opportunities(Utc::now()).await;
                        }
                    }
                },
            ),
            spawn_loop("exits", self.schedule.exit_scan_ms, shutdown.subscribe(), {
                let runner = Arc::clone(&self);
                move || {
                    let runner = Arc::clone(&runner);
                    async move {
                        runner.scan_exits(Utc::now()).await;
                    }
                }
            }),
            spawn_loop("settlement", self.schedule.settlement_scan_ms, shutdown.subscribe(), {
                let runner = Arc::clone(&self);
                move || {
                    let runner = Arc::clone(&runner);
                    async move {
                        runner.settle(Utc::now()).await;
                    }
                }
            }),
        ];

        for handle in futures_util::future::join_all(handles).await {
            if let Err(e) = handle {
                warn!(error = %e, "engine loop panicked");
            }
        }
        if let Some(stream) = &self.stream {
            stream.shutdown();
        }

        let runner_stats = self.stats();
        let lifecycle_stats = self.lifecycle.stats();
        info!(
            windows = runner_stats.windows_discovered,
            captured = runner_stats.references_captured,
            skipped = runner_stats.windows_skipped,
            opportunities = runner_stats.opportunities,
            entries = lifecycle_stats.entries_filled,
            closed = lifecycle_stats.closed,
            win_rate = format!("{:.1}%", lifecycle_stats.win_rate() * 100.0),
            pnl = %lifecycle_stats.realized_pnl,
            open_positions = self.lifecycle.open_positions().len(),
            "engine stopped"
        );
        (runner_stats, lifecycle_stats)
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period_ms: u64,
    mut shutdown: broadcast::Receiver<()>,
    mut step: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(task = name, "loop stopping");
                    break;
                }
                _ = ticker.tick() => step().await,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_rules::ExitRules;
    use crate::odds::QuoteSource;
    use crate::risk::DailyRiskGate;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use updown_core::{NullEventSink, Outcome, PositionStore, PriceFeed, StoreError};
    use updown_polymarket::clob::{PaperExecutor, PaperExecutorConfig};
    use updown_polymarket::{window_slug, SpotPriceStore};

    struct FixedWindows(Vec<MarketWindow>);

    #[async_trait]
    impl WindowSource for FixedWindows {
        async fn discover(&self, _assets: &[Asset], _now: DateTime<Utc>) -> Vec<MarketWindow> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct Quotes(Mutex<HashMap<String, Decimal>>);

    #[async_trait]
    impl QuoteSource for Quotes {
        fn name(&self) -> &str {
            "test"
        }

        async fn quote(&self, token_id: &str) -> Option<Decimal> {
            self.0.lock().get(token_id).copied()
        }
    }

    struct Unresolved;

    #[async_trait]
    impl ResolutionSource for Unresolved {
        async fn resolution(&self, _window_id: &str) -> Option<Outcome> {
            None
        }
    }

    #[derive(Default)]
    struct MemoryStore(Mutex<HashMap<String, updown_core::Position>>);

    impl PositionStore for MemoryStore {
        fn load_open(&self) -> Result<Vec<updown_core::Position>, StoreError> {
            Ok(self.0.lock().values().cloned().collect())
        }

        fn save(&self, position: &updown_core::Position) -> Result<(), StoreError> {
            self.0.lock().insert(position.id.clone(), position.clone());
            Ok(())
        }

        fn remove(&self, position_id: &str) -> Result<(), StoreError> {
            self.0.lock().remove(position_id);
            Ok(())
        }
    }

    fn window(start: DateTime<Utc>) -> MarketWindow {
        MarketWindow {
            id: window_slug(Asset::Btc, start.timestamp()),
            asset: Asset::Btc,
            condition_id: "0xcond".to_string(),
            start,
            end: start + chrono::Duration::seconds(900),
            up_token_id: "up".to_string(),
            down_token_id: "down".to_string(),
            up_price: None,
            down_price: None,
        }
    }

    struct Fixture {
        runner: EngineRunner,
        spot: Arc<SpotPriceStore>,
        quotes: Arc<Quotes>,
    }

    fn fixture(window: MarketWindow) -> Fixture {
        let config = AppConfig {
            assets: vec![Asset::Btc],
            ..AppConfig::default()
        };
        let events: Arc<dyn EventSink> = Arc::new(NullEventSink);
        let spot = Arc::new(SpotPriceStore::new("binance", Duration::from_secs(5)));
        let tracker = Arc::new(ReferenceTracker::new(
            config.tracker.clone(),
            vec![spot.clone() as Arc<dyn PriceFeed>],
            events.clone(),
        ));
        let quotes = Arc::new(Quotes::default());
        let odds = Arc::new(OddsAggregator::new(
            vec![quotes.clone() as Arc<dyn QuoteSource>],
            Duration::from_secs(30),
        ));
        let executor: Arc<dyn OrderExecutor> =
            Arc::new(PaperExecutor::new(PaperExecutorConfig::always_fill()));
        let lifecycle_config = updown_core::LifecycleConfig {
            fill_poll_interval_ms: 1,
            ..config.lifecycle.clone()
        };
        let lifecycle = Arc::new(LifecycleEngine::new(
            lifecycle_config,
            ExitRules::new(config.exit.clone()),
            executor.clone(),
            Arc::new(DailyRiskGate::new(config.risk.clone())),
            Arc::new(MemoryStore::default()),
            events.clone(),
        ));
        let runner = EngineRunner::new(
            &config,
            RunnerParts {
                tracker,
                odds,
                cache: Arc::new(GammaQuoteCache::new(Duration::from_secs(60))),
                stream: None,
                windows: Arc::new(FixedWindows(vec![window])),
                lifecycle,
                resolver: Arc::new(Unresolved),
                executor,
                events,
            },
        );
        Fixture {
            runner,
            spot,
            quotes,
        }
    }

    #[tokio::test]
    async fn full_cycle_opens_one_position() {
        let now = Utc::now();
        let start = now - chrono::Duration::seconds(2);
        let f = fixture(window(start));

        f.spot.update(Asset::Btc, dec!(90000), now);
        assert_eq!(f.runner.scan_windows(now).await, 1);
        let state = f.runner.tracker().reference(&window_slug(Asset::Btc, start.timestamp()));
        assert_eq!(state.unwrap().reference_price, Some(dec!(90000)));

        f.quotes.0.lock().insert("up".to_string(), dec!(0.40));
        f.quotes.0.lock().insert("down".to_string(), dec!(0.60));
        assert_eq!(f.runner.refresh_odds(now).await, 2);

        f.runner.refresh_bankroll().await;
        let later = now + chrono::Duration::seconds(1);
        f.spot.update(Asset::Btc, dec!(90225), later);
        let opened = f.runner.scan_opportunities(later).await;
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].outcome, Outcome::Up);
        assert!(f.runner.bankroll() < dec!(1000));

        // Second scan inside the cooldown opens nothing.
        let opened = f.runner.scan_opportunities(later).await;
        assert!(opened.is_empty());
        assert_eq!(f.runner.lifecycle().open_positions().len(), 1);
        assert_eq!(f.runner.stats().entries_opened, 1);
    }

    #[tokio::test]
    async fn eviction_drops_window_counters_but_keeps_position() {
        let now = Utc::now();
        let start = now - chrono::Duration::seconds(2);
        let f = fixture(window(start));
        let window_id = window_slug(Asset::Btc, start.timestamp());

        f.spot.update(Asset::Btc, dec!(90000), now);
        f.runner.scan_windows(now).await;
        f.quotes.0.lock().insert("up".to_string(), dec!(0.40));
        f.quotes.0.lock().insert("down".to_string(), dec!(0.60));
        f.runner.refresh_odds(now).await;
        f.runner.refresh_bankroll().await;
        let later = now + chrono::Duration::seconds(1);
        f.spot.update(Asset::Btc, dec!(90225), later);
        assert_eq!(f.runner.scan_opportunities(later).await.len(), 1);
        assert_eq!(f.runner.lifecycle().book().window_entries(&window_id), 1);

        // Past the window end plus the eviction grace, still unresolved.
        let evict_at = start + chrono::Duration::seconds(900 + 121);
        let settled = f.runner.settle(evict_at).await;
        assert!(settled.is_empty());
        assert!(f.runner.tracker().reference(&window_id).is_none());
        assert_eq!(f.runner.lifecycle().book().window_entries(&window_id), 0);
        assert_eq!(f.runner.lifecycle().open_positions().len(), 1);
    }

    #[tokio::test]
    async fn small_move_is_counted_as_rejection() {
        let now = Utc::now();
        let start = now - chrono::Duration::seconds(2);
        let f = fixture(window(start));

        f.spot.update(Asset::Btc, dec!(90000), now);
        f.runner.scan_windows(now).await;
        f.quotes.0.lock().insert("up".to_string(), dec!(0.50));
        f.quotes.0.lock().insert("down".to_string(), dec!(0.50));
        f.runner.refresh_odds(now).await;
        f.spot.update(Asset::Btc, dec!(90010), now);

        assert!(f.runner.scan_opportunities(now).await.is_empty());
        assert_eq!(f.runner.stats().rejections.get("move_too_small"), Some(&1));
    }

    #[tokio::test]
    async fn late_discovery_skips_window() {
        let now = Utc::now();
        let start = now - chrono::Duration::seconds(120);
        let f = fixture(window(start));
        f.spot.update(Asset::Btc, dec!(90000), now);

        f.runner.scan_windows(now).await;
        let stats = f.runner.stats();
        assert_eq!(stats.windows_skipped, 1);
        assert_eq!(stats.references_captured, 0);
    }

    #[tokio::test]
    async fn shutdown_stops_every_loop() {
        let now = Utc::now();
        let f = fixture(window(now - chrono::Duration::seconds(2)));
        let runner = Arc::new(f.runner);
        let (tx, _rx) = broadcast::channel(1);

        let handle = tokio::spawn(Arc::clone(&runner).run(tx.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        let (stats, _) = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(stats.window_scans >= 1);
        assert!(stats.started_at.is_some());
    }
}
