//! Window reference ("price to beat") tracking.
//!
//! Each 15-minute window resolves UP when the underlying closes above the
//! price at the window's start. Getting that reference wrong inverts every
//! direction signal, so it is captured once and never overwritten:
//!
//! 1. **Scheduled**: a capture armed before the window opens fires at the
//!    exact start instant and averages every fresh feed.
//! 2. **Fresh snapshot**: a window first seen within a few seconds of its
//!    start takes the current fresh price.
//! 3. **Multi-source average**: a window seen later, but still early, needs
//!    at least two fresh feeds to agree on an average.
//! 4. Anything older is skipped for its whole life.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use updown_core::{Asset, EngineEvent, EventSink, PriceFeed, TrackerConfig};
use updown_polymarket::{window_slug, MarketWindow};

// =============================================================================
// Types
// =============================================================================

/// How a reference price was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    Scheduled,
    FreshSnapshot,
    MultiSourceAverage,
}

impl CaptureMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMethod::Scheduled => "scheduled",
            CaptureMethod::FreshSnapshot => "fresh_snapshot",
            CaptureMethod::MultiSourceAverage => "multi_source_average",
        }
    }
}

impl fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which capture path applies to a window of a given age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePlan {
    UseScheduled,
    FreshSnapshot,
    MultiSourceAverage,
    /// The window has not opened yet.
    Wait,
    Skip,
}

/// Result of handing a discovered window to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    AlreadyCaptured(Decimal),
    Captured {
        price: Decimal,
        method: CaptureMethod,
    },
    /// No usable price this scan; the next scan retries.
    Pending,
    Skipped,
}

/// One fresh spot observation, tagged with the feed it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePrice {
    pub source: String,
    pub price: Decimal,
}

/// Tracker state for one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowReference {
    pub window: MarketWindow,
    pub reference_price: Option<Decimal>,
    pub captured_at: Option<DateTime<Utc>>,
    pub method: Option<CaptureMethod>,
    /// Most recent aggregated outcome quotes.
    pub up_price: Option<Decimal>,
    pub down_price: Option<Decimal>,
    pub odds_updated_at: Option<DateTime<Utc>>,
    pub entries: u32,
    pub last_entry: Option<DateTime<Utc>>,
    pub skipped: bool,
}

impl WindowReference {
    fn new(window: MarketWindow) -> Self {
        Self {
            up_price: window.up_price,
            down_price: window.down_price,
            window,
            reference_price: None,
            captured_at: None,
            method: None,
            odds_updated_at: None,
            entries: 0,
            last_entry: None,
            skipped: false,
        }
    }

    #[must_use]
    pub fn window_id(&self) -> &str {
        &self.window.id
    }

    #[must_use]
    pub fn asset(&self) -> Asset {
        self.window.asset
    }

    /// Captured and not skipped.
    #[must_use]
    pub fn is_tradeable(&self, now: DateTime<Utc>) -> bool {
        self.reference_price.is_some() && !self.skipped && self.window.is_active(now)
    }

    /// Fraction of the window already elapsed, in `[0, 1]`.
    #[must_use]
    pub fn elapsed_fraction(&self, now: DateTime<Utc>) -> f64 {
        let total = (self.window.end - self.window.start).num_milliseconds();
        if total <= 0 {
            return 1.0;
        }
        let elapsed = (now - self.window.start).num_milliseconds();
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    }
}

/// Arithmetic mean; `None` for an empty slice.
fn average(prices: &[Decimal]) -> Option<Decimal> {
    if prices.is_empty() {
        return None;
    }
    let sum: Decimal = prices.iter().copied().sum();
    Some(sum / Decimal::from(prices.len()))
}

// =============================================================================
// Tracker
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScheduledCapture {
    Armed,
    Fired(Decimal, DateTime<Utc>),
}

/// Owns every window's reference state. Callers only see clones.
pub struct ReferenceTracker {
    config: TrackerConfig,
    feeds: Vec<Arc<dyn PriceFeed>>,
    windows: RwLock<HashMap<String, WindowReference>>,
    scheduled: RwLock<HashMap<String, ScheduledCapture>>,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for ReferenceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceTracker")
            .field("feeds", &self.feeds.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("windows", &self.windows.read().len())
            .field("scheduled", &self.scheduled.read().len())
            .finish()
    }
}

impl ReferenceTracker {
    #[must_use]
    pub fn new(
        config: TrackerConfig,
        feeds: Vec<Arc<dyn PriceFeed>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            feeds,
            windows: RwLock::new(HashMap::new()),
            scheduled: RwLock::new(HashMap::new()),
            events,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Capture path for a window `age_secs` after its start.
    #[must_use]
    pub fn plan_capture(&self, age_secs: i64, scheduled: bool) -> CapturePlan {
        if scheduled {
            return CapturePlan::UseScheduled;
        }
        if age_secs < 0 {
            return CapturePlan::Wait;
        }
        let age = age_secs.unsigned_abs();
        if age <= self.config.fresh_snapshot_secs {
            CapturePlan::FreshSnapshot
        } else if age <= self.config.multi_source_secs {
            CapturePlan::MultiSourceAverage
        } else {
            CapturePlan::Skip
        }
    }

    /// Every feed's price for `asset` that is positive and fresh at `now`.
    #[must_use]
    pub fn fresh_prices(&self, asset: Asset, now: DateTime<Utc>) -> Vec<SourcePrice> {
        self.feeds
            .iter()
            .filter_map(|feed| {
                feed.fresh_price(asset, now).map(|sample| SourcePrice {
                    source: feed.name().to_string(),
                    price: sample.price,
                })
            })
            .collect()
    }

    /// Mean of the fresh feed prices, if any.
    #[must_use]
    pub fn spot_price(&self, asset: Asset, now: DateTime<Utc>) -> Option<Decimal> {
        let prices: Vec<Decimal> = self
            .fresh_prices(asset, now)
            .into_iter()
            .map(|p| p.price)
            .collect();
        average(&prices)
    }

    /// Arms a capture at `start` (unix seconds) for the window of `asset`.
    /// Returns false when one is already armed or fired for that window.
    pub fn schedule_capture(
        self: &Arc<Self>,
        asset: Asset,
        start: i64,
        now: DateTime<Utc>,
    ) -> bool {
        let window_id = window_slug(asset, start);
        {
            let mut scheduled = self.scheduled.write();
            if scheduled.contains_key(&window_id) {
                return false;
            }
            scheduled.insert(window_id.clone(), ScheduledCapture::Armed);
        }

        let Some(start_at) = Utc.timestamp_opt(start, 0).single() else {
            self.scheduled.write().remove(&window_id);
            return false;
        };
        let delay = (start_at - now).to_std().unwrap_or_default();
        debug!(window = %window_id, delay_ms = delay.as_millis() as u64, "capture scheduled");

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracker.fire_scheduled(asset, start, Utc::now());
        });
        true
    }

    /// Runs an armed capture for the window of `asset` starting at `start`.
    /// Averages every fresh feed; disarms itself when nothing is fresh so the
    /// fallback policy takes over.
    pub fn fire_scheduled(&self, asset: Asset, start: i64, at: DateTime<Utc>) -> Option<Decimal> {
        let window_id = window_slug(asset, start);
        let prices: Vec<Decimal> = self
            .fresh_prices(asset, at)
            .into_iter()
            .map(|p| p.price)
            .collect();

        let Some(price) = average(&prices) else {
            warn!(window = %window_id, "scheduled capture found no fresh price");
            self.scheduled.write().remove(&window_id);
            return None;
        };

        self.scheduled
            .write()
            .insert(window_id.clone(), ScheduledCapture::Fired(price, at));
        info!(
            window = %window_id,
            price = %price,
            sources = prices.len(),
            "scheduled capture fired"
        );

        // The window may already be known if discovery beat the timer.
        if self.windows.read().contains_key(&window_id) {
            self.set_reference(&window_id, price, CaptureMethod::Scheduled, at);
        }
        Some(price)
    }

    fn scheduled_price(&self, window_id: &str) -> Option<(Decimal, DateTime<Utc>)> {
        match self.scheduled.read().get(window_id) {
            Some(ScheduledCapture::Fired(price, at)) => Some((*price, *at)),
            _ => None,
        }
    }

    /// First writer wins; zero and negative prices are never recorded.
    fn set_reference(
        &self,
        window_id: &str,
        price: Decimal,
        method: CaptureMethod,
        at: DateTime<Utc>,
    ) -> bool {
        if price <= Decimal::ZERO {
            return false;
        }
        let asset = {
            let mut windows = self.windows.write();
            let Some(state) = windows.get_mut(window_id) else {
                return false;
            };
            if state.reference_price.is_some() || state.skipped {
                return false;
            }
            state.reference_price = Some(price);
            state.captured_at = Some(at);
            state.method = Some(method);
            state.asset()
        };

        self.events.emit(&EngineEvent::ReferenceCaptured {
            window_id: window_id.to_string(),
            asset,
            price,
            method: method.to_string(),
            at,
        });
        true
    }

    fn mark_skipped(&self, window_id: &str, age_secs: i64) {
        {
            let mut windows = self.windows.write();
            match windows.get_mut(window_id) {
                Some(state) if !state.skipped => state.skipped = true,
                _ => return,
            }
        }
        let reason = format!("discovered {age_secs}s after start with no capture");
        info!(window = %window_id, reason = %reason, "window skipped");
        self.events.emit(&EngineEvent::WindowSkipped {
            window_id: window_id.to_string(),
            reason,
        });
    }

    /// Registers a discovered window (refreshing its cached quotes) and
    /// attempts to capture its reference.
    pub fn on_window_discovered(
        &self,
        window: &MarketWindow,
        now: DateTime<Utc>,
    ) -> CaptureOutcome {
        {
            let mut windows = self.windows.write();
            let state = windows
                .entry(window.id.clone())
                .or_insert_with(|| WindowReference::new(window.clone()));
            state.window.up_price = window.up_price.or(state.window.up_price);
            state.window.down_price = window.down_price.or(state.window.down_price);
            if let Some(price) = state.reference_price {
                return CaptureOutcome::AlreadyCaptured(price);
            }
            if state.skipped {
                return CaptureOutcome::Skipped;
            }
        }

        let age = window.age_secs(now);
        let scheduled = self.scheduled_price(&window.id);
        let plan = self.plan_capture(age, scheduled.is_some());

        let (price, method, at) = match plan {
            CapturePlan::Wait => return CaptureOutcome::Pending,
            CapturePlan::Skip => {
                self.mark_skipped(&window.id, age);
                return CaptureOutcome::Skipped;
            }
            CapturePlan::UseScheduled => match scheduled {
                Some((price, at)) => (Some(price), CaptureMethod::Scheduled, at),
                None => return CaptureOutcome::Pending,
            },
            CapturePlan::FreshSnapshot => {
                let prices: Vec<Decimal> = self
                    .fresh_prices(window.asset, now)
                    .into_iter()
                    .map(|p| p.price)
                    .collect();
                (average(&prices), CaptureMethod::FreshSnapshot, now)
            }
            CapturePlan::MultiSourceAverage => {
                let prices: Vec<Decimal> = self
                    .fresh_prices(window.asset, now)
                    .into_iter()
                    .map(|p| p.price)
                    .collect();
                let price = if prices.len() >= self.config.min_sources {
                    average(&prices)
                } else {
                    None
                };
                (price, CaptureMethod::MultiSourceAverage, now)
            }
        };

        let Some(price) = price else {
            debug!(
                window = %window.id,
                age_secs = age,
                plan = ?plan,
                "no usable price for capture"
            );
            return CaptureOutcome::Pending;
        };

        if self.set_reference(&window.id, price, method, at) {
            debug!(
                window = %window.id,
                price = %price,
                method = %method,
                age_secs = age,
                "reference captured"
            );
            CaptureOutcome::Captured { price, method }
        } else {
            match self.reference(&window.id).and_then(|r| r.reference_price) {
                Some(existing) => CaptureOutcome::AlreadyCaptured(existing),
                None => CaptureOutcome::Pending,
            }
        }
    }

    #[must_use]
    pub fn reference(&self, window_id: &str) -> Option<WindowReference> {
        self.windows.read().get(window_id).cloned()
    }

    /// Counts an entry against the window. False for unknown windows.
    pub fn record_entry(&self, window_id: &str, at: DateTime<Utc>) -> bool {
        let mut windows = self.windows.write();
        match windows.get_mut(window_id) {
            Some(state) => {
                state.entries += 1;
                state.last_entry = Some(at);
                true
            }
            None => false,
        }
    }

    /// Stores the latest aggregated quotes. Quotes outside (0, 1) are ignored.
    pub fn update_odds(
        &self,
        window_id: &str,
        up: Option<Decimal>,
        down: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> bool {
        let valid = |p: Option<Decimal>| p.filter(|p| *p > Decimal::ZERO && *p < Decimal::ONE);
        let (up, down) = (valid(up), valid(down));
        if up.is_none() && down.is_none() {
            return false;
        }
        let mut windows = self.windows.write();
        let Some(state) = windows.get_mut(window_id) else {
            return false;
        };
        if up.is_some() {
            state.up_price = up;
        }
        if down.is_some() {
            state.down_price = down;
        }
        state.odds_updated_at = Some(at);
        true
    }

    /// Drops windows that ended more than the grace period ago, along with
    /// their scheduled captures. Returns the removed states.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Vec<WindowReference> {
        let grace = chrono::Duration::seconds(
            i64::try_from(self.config.eviction_grace_secs).unwrap_or(i64::MAX / 2),
        );
        let expired: Vec<WindowReference> = {
            let mut windows = self.windows.write();
            let ids: Vec<String> = windows
                .values()
                .filter(|s| s.window.end + grace < now)
                .map(|s| s.window.id.clone())
                .collect();
            ids.iter().filter_map(|id| windows.remove(id)).collect()
        };

        let window_secs = i64::try_from(self.config.window_secs).unwrap_or(900);
        let cutoff = now.timestamp() - window_secs - grace.num_seconds();
        self.scheduled.write().retain(|id, _| {
            id.rsplit('-')
                .next()
                .and_then(|s| s.parse::<i64>().ok())
                .map_or(false, |start| start > cutoff)
        });

        for state in &expired {
            debug!(window = %state.window.id, "window evicted");
        }
        expired
    }

    /// Every tracked window, ordered by ID.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WindowReference> {
        let mut all: Vec<WindowReference> = self.windows.read().values().cloned().collect();
        all.sort_by(|a, b| a.window.id.cmp(&b.window.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use updown_core::{ChannelEventSink, NullEventSink};
    use updown_polymarket::SpotPriceStore;

    fn window_at(asset: Asset, start: DateTime<Utc>) -> MarketWindow {
        MarketWindow {
            id: window_slug(asset, start.timestamp()),
            asset,
            condition_id: "0xcond".to_string(),
            start,
            end: start + chrono::Duration::seconds(900),
            up_token_id: "up".to_string(),
            down_token_id: "down".to_string(),
            up_price: Some(dec!(0.5)),
            down_price: Some(dec!(0.5)),
        }
    }

    fn aligned_start() -> DateTime<Utc> {
        let now = Utc::now().timestamp();
        Utc.timestamp_opt(now - now.rem_euclid(900), 0).unwrap()
    }

    fn feeds(prices: &[(&str, Decimal)], at: DateTime<Utc>) -> Vec<Arc<dyn PriceFeed>> {
        prices
            .iter()
            .map(|(name, price)| {
                let store = SpotPriceStore::new(*name, std::time::Duration::from_secs(5));
                store.update(Asset::Btc, *price, at);
                Arc::new(store) as Arc<dyn PriceFeed>
            })
            .collect()
    }

    fn tracker(feeds: Vec<Arc<dyn PriceFeed>>) -> Arc<ReferenceTracker> {
        Arc::new(ReferenceTracker::new(
            TrackerConfig::default(),
            feeds,
            Arc::new(NullEventSink),
        ))
    }

    #[test]
    fn plan_follows_age_thresholds() {
        let t = tracker(vec![]);
        assert_eq!(t.plan_capture(400, true), CapturePlan::UseScheduled);
        assert_eq!(t.plan_capture(-3, false), CapturePlan::Wait);
        assert_eq!(t.plan_capture(0, false), CapturePlan::FreshSnapshot);
        assert_eq!(t.plan_capture(5, false), CapturePlan::FreshSnapshot);
        assert_eq!(t.plan_capture(6, false), CapturePlan::MultiSourceAverage);
        assert_eq!(t.plan_capture(30, false), CapturePlan::MultiSourceAverage);
        assert_eq!(t.plan_capture(31, false), CapturePlan::Skip);
    }

    #[test]
    fn fresh_snapshot_averages_fresh_feeds() {
        let start = aligned_start();
        let now = start + chrono::Duration::seconds(2);
        let t = tracker(feeds(&[("binance", dec!(90000)), ("coinbase", dec!(90010))], now));

        let outcome = t.on_window_discovered(&window_at(Asset::Btc, start), now);
        assert_eq!(
            outcome,
            CaptureOutcome::Captured {
                price: dec!(90005),
                method: CaptureMethod::FreshSnapshot
            }
        );
    }

    #[test]
    fn multi_source_needs_two_feeds() {
        let start = aligned_start();
        let now = start + chrono::Duration::seconds(20);
        let single = tracker(feeds(&[("binance", dec!(90000))], now));
        let window = window_at(Asset::Btc, start);

        assert_eq!(single.on_window_discovered(&window, now), CaptureOutcome::Pending);
        assert!(single.reference(&window.id).unwrap().reference_price.is_none());

        let both = tracker(feeds(&[("binance", dec!(90000)), ("coinbase", dec!(90020))], now));
        assert_eq!(
            both.on_window_discovered(&window, now),
            CaptureOutcome::Captured {
                price: dec!(90010),
                method: CaptureMethod::MultiSourceAverage
            }
        );
    }

    #[test]
    fn late_window_is_skipped_for_good() {
        let start = aligned_start();
        let now = start + chrono::Duration::seconds(120);
        let (sink, mut rx) = ChannelEventSink::new();
        let t = ReferenceTracker::new(
            TrackerConfig::default(),
            feeds(&[("binance", dec!(90000)), ("coinbase", dec!(90000))], now),
            Arc::new(sink),
        );
        let window = window_at(Asset::Btc, start);

        assert_eq!(t.on_window_discovered(&window, now), CaptureOutcome::Skipped);
        assert_eq!(t.on_window_discovered(&window, now), CaptureOutcome::Skipped);
        assert!(t.reference(&window.id).unwrap().skipped);
        assert!(matches!(rx.try_recv(), Ok(EngineEvent::WindowSkipped { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reference_is_set_once_and_never_zero() {
        let start = aligned_start();
        let now = start + chrono::Duration::seconds(1);
        let t = tracker(feeds(&[("binance", dec!(90000))], now));
        let window = window_at(Asset::Btc, start);

        assert!(matches!(
            t.on_window_discovered(&window, now),
            CaptureOutcome::Captured { .. }
        ));
        assert!(!t.set_reference(&window.id, dec!(91000), CaptureMethod::Scheduled, now));
        assert_eq!(
            t.on_window_discovered(&window, now + chrono::Duration::seconds(1)),
            CaptureOutcome::AlreadyCaptured(dec!(90000))
        );

        let other = window_at(Asset::Btc, start + chrono::Duration::seconds(900));
        t.on_window_discovered(&other, start);
        assert!(!t.set_reference(&other.id, Decimal::ZERO, CaptureMethod::FreshSnapshot, now));
        assert!(t.reference(&other.id).unwrap().reference_price.is_none());
    }

    #[test]
    fn stale_feed_is_never_recorded() {
        let start = aligned_start();
        let now = start + chrono::Duration::seconds(2);
        let stale = now - chrono::Duration::seconds(30);
        let t = tracker(feeds(&[("binance", dec!(90000))], stale));
        let window = window_at(Asset::Btc, start);

        assert_eq!(t.on_window_discovered(&window, now), CaptureOutcome::Pending);
        assert!(t.reference(&window.id).unwrap().reference_price.is_none());
    }

    #[test]
    fn fired_schedule_wins_over_late_discovery() {
        let start = aligned_start();
        let t = tracker(feeds(&[("binance", dec!(90000)), ("coinbase", dec!(90100))], start));
        t.scheduled
            .write()
            .insert(window_slug(Asset::Btc, start.timestamp()), ScheduledCapture::Armed);

        assert_eq!(
            t.fire_scheduled(Asset::Btc, start.timestamp(), start),
            Some(dec!(90050))
        );

        // Discovered 200s in: too late for any fallback, but the schedule fired.
        let now = start + chrono::Duration::seconds(200);
        let outcome = t.on_window_discovered(&window_at(Asset::Btc, start), now);
        assert_eq!(
            outcome,
            CaptureOutcome::Captured {
                price: dec!(90050),
                method: CaptureMethod::Scheduled
            }
        );
        let state = t.reference(&window_slug(Asset::Btc, start.timestamp())).unwrap();
        assert_eq!(state.captured_at, Some(start));
    }

    #[test]
    fn scheduled_capture_without_prices_disarms() {
        let start = aligned_start();
        let t = tracker(vec![]);
        assert_eq!(t.fire_scheduled(Asset::Btc, start.timestamp(), start), None);
        assert!(t.scheduled.read().is_empty());
    }

    #[tokio::test]
    async fn schedule_capture_is_idempotent_and_fires() {
        let now = Utc::now();
        let store = Arc::new(SpotPriceStore::new("binance", std::time::Duration::from_secs(60)));
        store.update(Asset::Btc, dec!(90000), now);
        let t = tracker(vec![store as Arc<dyn PriceFeed>]);

        let start = now.timestamp() + 1;
        assert!(t.schedule_capture(Asset::Btc, start, now));
        assert!(!t.schedule_capture(Asset::Btc, start, now));

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        assert_eq!(
            t.scheduled_price(&window_slug(Asset::Btc, start)).map(|(p, _)| p),
            Some(dec!(90000))
        );
    }

    #[test]
    fn update_odds_rejects_out_of_range() {
        let start = aligned_start();
        let t = tracker(vec![]);
        let window = window_at(Asset::Btc, start);
        t.on_window_discovered(&window, start - chrono::Duration::seconds(1));

        assert!(!t.update_odds(&window.id, Some(Decimal::ZERO), Some(Decimal::ONE), start));
        assert!(t.update_odds(&window.id, Some(dec!(0.42)), None, start));
        let state = t.reference(&window.id).unwrap();
        assert_eq!(state.up_price, Some(dec!(0.42)));
        assert_eq!(state.down_price, Some(dec!(0.5)));
        assert!(!t.update_odds("missing", Some(dec!(0.4)), None, start));
    }

    #[test]
    fn evicts_after_grace_period() {
        let start = aligned_start();
        let t = tracker(vec![]);
        let window = window_at(Asset::Btc, start);
        t.on_window_discovered(&window, start - chrono::Duration::seconds(1));
        t.record_entry(&window.id, start);

        let end = window.end;
        assert!(t.evict_expired(end + chrono::Duration::seconds(60)).is_empty());
        let evicted = t.evict_expired(end + chrono::Duration::seconds(121));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].entries, 1);
        assert!(t.snapshot().is_empty());
    }

    #[test]
    fn elapsed_fraction_is_clamped() {
        let start = aligned_start();
        let state = WindowReference::new(window_at(Asset::Btc, start));
        assert_eq!(state.elapsed_fraction(start - chrono::Duration::seconds(5)), 0.0);
        let halfway = state.elapsed_fraction(start + chrono::Duration::seconds(450));
        assert!((halfway - 0.5).abs() < 1e-9);
        assert_eq!(state.elapsed_fraction(start + chrono::Duration::seconds(2000)), 1.0);
    }

    #[test]
    fn spot_price_ignores_stale_feed() {
        let now = Utc::now();
        let fresh = SpotPriceStore::new("binance", std::time::Duration::from_secs(5));
        fresh.update(Asset::Btc, dec!(90000), now);
        let stale = SpotPriceStore::new("coinbase", std::time::Duration::from_secs(5));
        stale.update(Asset::Btc, dec!(80000), now - chrono::Duration::seconds(10));
        let t = tracker(vec![
            Arc::new(fresh) as Arc<dyn PriceFeed>,
            Arc::new(stale) as Arc<dyn PriceFeed>,
        ]);

        assert_eq!(t.spot_price(Asset::Btc, now), Some(dec!(90000)));
        assert_eq!(t.fresh_prices(Asset::Btc, now).len(), 1);
        assert_eq!(t.spot_price(Asset::Eth, now), None);
    }
}
