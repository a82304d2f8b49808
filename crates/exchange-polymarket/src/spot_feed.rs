//! Spot price feeds for the underlying assets.
//!
//! ```text
//! Binance WebSocket (aggTrade) ──► BinanceFeed::run ──┐
//!                                                     ├─► SpotPriceStore (PriceFeed)
//! Coinbase REST (/v2/prices) ───► CoinbaseFeed::run ──┘
//! ```
//!
//! Each feed writes into its own store so the engine can compare sources.

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use updown_core::{Asset, PriceFeed, PriceSample};

pub const BINANCE_FUTURES_WS: &str = "wss://fstream.binance.com/ws";
pub const COINBASE_API_URL: &str = "https://api.coinbase.com";

#[derive(Error, Debug)]
pub enum SpotFeedError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("invalid price '{0}'")]
    InvalidPrice(String),
}

// =============================================================================
// Store
// =============================================================================

/// Latest price per asset from one source.
#[derive(Debug)]
pub struct SpotPriceStore {
    name: String,
    max_age: Duration,
    prices: RwLock<HashMap<Asset, PriceSample>>,
}

impl SpotPriceStore {
    #[must_use]
    pub fn new(name: impl Into<String>, max_age: Duration) -> Self {
        Self {
            name: name.into(),
            max_age,
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Records a sample. Non-positive prices and samples older than the one
    /// held are dropped.
    pub fn update(&self, asset: Asset, price: Decimal, observed_at: DateTime<Utc>) -> bool {
        if price <= Decimal::ZERO {
            return false;
        }
        let mut prices = self.prices.write();
        if let Some(existing) = prices.get(&asset) {
            if existing.observed_at > observed_at {
                return false;
            }
        }
        prices.insert(asset, PriceSample::new(price, observed_at));
        true
    }
}

impl PriceFeed for SpotPriceStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn current_price(&self, asset: Asset) -> Option<PriceSample> {
        self.prices.read().get(&asset).copied()
    }

    fn max_age(&self) -> Duration {
        self.max_age
    }
}

// =============================================================================
// Binance
// =============================================================================

#[derive(Debug, Clone)]
pub struct BinanceFeedConfig {
    pub base_url: String,
    pub assets: Vec<Asset>,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for BinanceFeedConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FUTURES_WS.to_string(),
            assets: Asset::all().to_vec(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AggTradeEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    /// Trade time in milliseconds.
    #[serde(rename = "T")]
    trade_time: i64,
}

/// Binance futures aggregated-trade stream for every configured asset.
pub struct BinanceFeed {
    config: BinanceFeedConfig,
    store: Arc<SpotPriceStore>,
}

impl BinanceFeed {
    #[must_use]
    pub fn new(config: BinanceFeedConfig, store: Arc<SpotPriceStore>) -> Self {
        Self { config, store }
    }

    /// `{base}/btcusdt@aggTrade/ethusdt@aggTrade/...`
    #[must_use]
    pub fn stream_url(&self) -> String {
        let streams: Vec<String> = self
            .config
            .assets
            .iter()
            .map(|a| format!("{}@aggTrade", a.binance_symbol()))
            .collect();
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), streams.join("/"))
    }

    /// Applies one aggTrade message. Returns the asset updated.
    pub fn handle_message(&self, text: &str) -> Result<Option<Asset>, SpotFeedError> {
        let event: AggTradeEvent = serde_json::from_str(text)?;
        if event.event_type != "aggTrade" {
            return Ok(None);
        }
        let Some(asset) = Asset::from_binance_symbol(&event.symbol) else {
            return Ok(None);
        };
        let price =
            Decimal::from_str(&event.price).map_err(|_| SpotFeedError::InvalidPrice(event.price))?;
        let observed_at =
            DateTime::from_timestamp_millis(event.trade_time).unwrap_or_else(Utc::now);
        Ok(self.store.update(asset, price, observed_at).then_some(asset))
    }

    /// Streams until shutdown, reconnecting with exponential backoff.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut delay = self.config.reconnect_delay;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("binance feed stopping");
                    return;
                }
                result = self.connect_and_stream() => {
                    if let Err(e) = result {
                        warn!(error = %e, delay = ?delay, "binance feed disconnected");
                    }
                }
            }
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.config.max_reconnect_delay);
        }
    }

    async fn connect_and_stream(&self) -> Result<(), SpotFeedError> {
        let url = self.stream_url();
        info!(%url, "connecting binance feed");
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();

        let mut parse_errors = 0u64;
        while let Some(msg) = read.next().await {
            match msg? {
                Message::Text(text) => match self.handle_message(&text) {
                    Ok(Some(asset)) => debug!(asset = %asset, "spot update"),
                    Ok(None) => {}
                    Err(e) => {
                        parse_errors += 1;
                        if parse_errors <= 5 {
                            warn!(error = %e, "unparsed binance message");
                        }
                    }
                },
                Message::Ping(data) => write.send(Message::Pong(data)).await?,
                Message::Close(frame) => {
                    return Err(SpotFeedError::Closed(
                        frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                    ));
                }
                _ => {}
            }
        }
        Err(SpotFeedError::Closed("stream ended".to_string()))
    }
}

// =============================================================================
// Coinbase
// =============================================================================

#[derive(Debug, Deserialize)]
struct CoinbaseSpotResponse {
    data: CoinbaseSpot,
}

#[derive(Debug, Deserialize)]
struct CoinbaseSpot {
    amount: String,
}

/// Polls Coinbase spot prices as an independent second source.
pub struct CoinbaseFeed {
    http: Client,
    base_url: String,
    assets: Vec<Asset>,
    poll_interval: Duration,
    store: Arc<SpotPriceStore>,
}

impl CoinbaseFeed {
    #[must_use]
    pub fn new(assets: Vec<Asset>, poll_interval: Duration, store: Arc<SpotPriceStore>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: COINBASE_API_URL.to_string(),
            assets,
            poll_interval,
            store,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn fetch(&self, asset: Asset) -> Result<Decimal, SpotFeedError> {
        let url = format!("{}/v2/prices/{}/spot", self.base_url, asset.coinbase_pair());
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let body: CoinbaseSpotResponse = response.json().await?;
        Decimal::from_str(&body.data.amount)
            .map_err(|_| SpotFeedError::InvalidPrice(body.data.amount))
    }

    /// Fetches every asset concurrently; failures leave the previous sample.
    pub async fn poll_once(&self) -> usize {
        let fetches = self.assets.iter().map(|asset| async move {
            match self.fetch(*asset).await {
                Ok(price) => self.store.update(*asset, price, Utc::now()),
                Err(e) => {
                    debug!(asset = %asset, error = %e, "coinbase poll failed");
                    false
                }
            }
        });
        futures_util::future::join_all(fetches)
            .await
            .into_iter()
            .filter(|updated| *updated)
            .count()
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("coinbase feed stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store() -> Arc<SpotPriceStore> {
        Arc::new(SpotPriceStore::new("test", Duration::from_secs(5)))
    }

    #[test]
    fn store_rejects_non_positive_and_out_of_order() {
        let store = store();
        let now = Utc::now();
        assert!(!store.update(Asset::Btc, Decimal::ZERO, now));
        assert!(!store.update(Asset::Btc, dec!(-1), now));
        assert!(store.update(Asset::Btc, dec!(90000), now));
        assert!(!store.update(Asset::Btc, dec!(89000), now - chrono::Duration::seconds(1)));
        assert_eq!(store.current_price(Asset::Btc).unwrap().price, dec!(90000));
        assert!(store.fresh_price(Asset::Btc, now).is_some());
        assert!(store
            .fresh_price(Asset::Btc, now + chrono::Duration::seconds(6))
            .is_none());
    }

    #[test]
    fn binance_url_combines_streams() {
        let feed = BinanceFeed::new(
            BinanceFeedConfig {
                assets: vec![Asset::Btc, Asset::Eth],
                ..Default::default()
            },
            store(),
        );
        assert_eq!(
            feed.stream_url(),
            "wss://fstream.binance.com/ws/btcusdt@aggTrade/ethusdt@aggTrade"
        );
    }

    #[test]
    fn binance_agg_trade_updates_store() {
        let store = store();
        let feed = BinanceFeed::new(BinanceFeedConfig::default(), Arc::clone(&store));

        let msg = r#"{"e":"aggTrade","E":1234567890123,"s":"ETHUSDT","a":123,"p":"3105.50","q":"0.1","f":1,"l":1,"T":1234567890000,"m":false}"#;
        assert_eq!(feed.handle_message(msg).unwrap(), Some(Asset::Eth));

        let sample = store.current_price(Asset::Eth).unwrap();
        assert_eq!(sample.price, dec!(3105.50));
        assert_eq!(sample.observed_at.timestamp_millis(), 1_234_567_890_000);

        assert!(feed.handle_message("not json").is_err());
        let unknown = r#"{"e":"aggTrade","s":"DOGEUSDT","p":"0.1","T":1}"#;
        assert_eq!(feed.handle_message(unknown).unwrap(), None);
    }

    #[tokio::test]
    async fn coinbase_poll_fills_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/prices/BTC-USD/spot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "amount": "90123.45", "base": "BTC", "currency": "USD" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/prices/ETH-USD/spot"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = store();
        let feed = CoinbaseFeed::new(
            vec![Asset::Btc, Asset::Eth],
            Duration::from_secs(1),
            Arc::clone(&store),
        )
        .with_base_url(server.uri());

        assert_eq!(feed.poll_once().await, 1);
        assert_eq!(store.current_price(Asset::Btc).unwrap().price, dec!(90123.45));
        assert!(store.current_price(Asset::Eth).is_none());
    }

    #[tokio::test]
    async fn coinbase_run_stops_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let feed = CoinbaseFeed::new(vec![], Duration::from_millis(10), store());
        let handle = tokio::spawn(async move { feed.run(rx).await });
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
