//! Market-channel WebSocket quote stream.
//!
//! Maintains an in-memory book per outcome token from `book` snapshots and
//! `price_change` deltas, plus the last trade price. Consumers poll
//! [`QuoteStream::quote`], which returns the mid of best bid and ask (or the
//! last trade when one side is empty) and nothing once the book goes stale.
//!
//! Subscription message:
//! ```json
//! { "assets_ids": ["token_id_1", "token_id_2"], "type": "market" }
//! ```
//! Tokens added later are sent as `{ "assets_ids": [...], "operation": "subscribe" }`.

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub const WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

#[derive(Error, Debug)]
pub enum QuoteStreamError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct QuoteStreamConfig {
    pub url: String,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub ping_interval: Duration,
    /// Books not updated within this long yield no quote.
    pub stale_after: Duration,
}

impl Default for QuoteStreamConfig {
    fn default() -> Self {
        Self {
            url: WS_URL.to_string(),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            ping_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Book state
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct TokenBook {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    pub last_trade: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TokenBook {
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Mid of best bid and ask, else the last trade.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => self.last_trade,
        }
    }

    fn apply_snapshot(&mut self, bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) {
        self.bids = bids.into_iter().collect();
        self.asks = asks.into_iter().collect();
    }

    fn apply_delta(&mut self, is_bid: bool, price: Decimal, size: Decimal) {
        let side = if is_bid { &mut self.bids } else { &mut self.asks };
        if size.is_zero() {
            side.remove(&price);
        } else {
            side.insert(price, size);
        }
    }
}

/// A usable probability quote lies strictly inside (0, 1).
fn valid_quote(price: Decimal) -> Option<Decimal> {
    (price > Decimal::ZERO && price < Decimal::ONE).then_some(price)
}

// =============================================================================
// Wire messages
// =============================================================================

#[derive(Debug, Serialize)]
struct SubscriptionMessage<'a> {
    assets_ids: &'a [String],
    #[serde(rename = "type")]
    msg_type: &'static str,
}

#[derive(Debug, Serialize)]
struct SubscriptionOp<'a> {
    assets_ids: &'a [String],
    operation: &'static str,
}

#[derive(Debug, Deserialize)]
struct WsMessage {
    event_type: String,
    #[serde(flatten)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BookMessage {
    asset_id: String,
    #[serde(default)]
    bids: Vec<PriceLevel>,
    #[serde(default)]
    asks: Vec<PriceLevel>,
}

#[derive(Debug, Deserialize)]
struct PriceLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct PriceChangeMessage {
    #[serde(default)]
    price_changes: Vec<PriceChange>,
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    side: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceChange {
    asset_id: String,
    price: String,
    size: String,
    side: String,
}

#[derive(Debug, Deserialize)]
struct LastTradePriceMessage {
    asset_id: String,
    price: String,
}

/// Parses a decimal, accepting the `.48` form.
fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('.') {
        Decimal::from_str(&format!("0.{rest}")).ok()
    } else {
        Decimal::from_str(s).ok()
    }
}

fn is_bid(side: &str) -> bool {
    matches!(side.to_ascii_uppercase().as_str(), "BUY" | "B" | "BID")
}

// =============================================================================
// Handle
// =============================================================================

#[derive(Debug)]
enum Command {
    Subscribe(Vec<String>),
    Shutdown,
}

struct Shared {
    books: RwLock<HashMap<String, TokenBook>>,
    subscribed: RwLock<Vec<String>>,
}

/// Cloneable handle onto the stream's book state.
#[derive(Clone)]
pub struct QuoteStream {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    stale_after: Duration,
}

impl QuoteStream {
    /// Spawns the connection task. It connects once there is at least one
    /// token to subscribe to and reconnects with exponential backoff.
    #[must_use]
    pub fn spawn(config: QuoteStreamConfig) -> Self {
        let stream = Self::detached(config.stale_after);
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Self {
            commands: tx,
            ..stream
        };
        tokio::spawn(run_connection_loop(config, Arc::clone(&stream.shared), rx));
        stream
    }

    /// A handle with no connection task; state changes only via
    /// [`QuoteStream::apply_message`].
    #[must_use]
    pub fn detached(stale_after: Duration) -> Self {
        let (commands, _) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                books: RwLock::new(HashMap::new()),
                subscribed: RwLock::new(Vec::new()),
            }),
            commands,
            stale_after,
        }
    }

    /// Adds tokens to the subscription. Already-subscribed tokens are ignored.
    pub fn subscribe(&self, token_ids: &[String]) {
        let fresh: Vec<String> = {
            let mut subscribed = self.shared.subscribed.write();
            let known: HashSet<&String> = subscribed.iter().collect();
            let fresh: Vec<String> = token_ids
                .iter()
                .filter(|t| !known.contains(t))
                .cloned()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            subscribed.extend(fresh.iter().cloned());
            fresh
        };
        if !fresh.is_empty() {
            let _ = self.commands.send(Command::Subscribe(fresh));
        }
    }

    /// Drops book state for tokens of evicted windows. The exchange keeps
    /// streaming them until the next reconnect; those updates are ignored.
    pub fn forget(&self, token_ids: &[String]) {
        let gone: HashSet<&String> = token_ids.iter().collect();
        self.shared.subscribed.write().retain(|t| !gone.contains(t));
        let mut books = self.shared.books.write();
        for token in token_ids {
            books.remove(token);
        }
    }

    #[must_use]
    pub fn subscribed(&self) -> Vec<String> {
        self.shared.subscribed.read().clone()
    }

    #[must_use]
    pub fn book(&self, token_id: &str) -> Option<TokenBook> {
        self.shared.books.read().get(token_id).cloned()
    }

    /// Fresh quote for a token, or `None` when missing, stale or outside (0, 1).
    #[must_use]
    pub fn quote(&self, token_id: &str, now: DateTime<Utc>) -> Option<Decimal> {
        let books = self.shared.books.read();
        let book = books.get(token_id)?;
        let updated = book.updated_at?;
        let age = (now - updated).to_std().unwrap_or(Duration::ZERO);
        if age > self.stale_after {
            return None;
        }
        valid_quote(book.mid()?)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Applies one raw text frame. Returns the number of book updates.
    pub fn apply_message(&self, text: &str, now: DateTime<Utc>) -> Result<usize, QuoteStreamError> {
        let messages: Vec<WsMessage> = if text.trim_start().starts_with('[') {
            serde_json::from_str(text)?
        } else {
            vec![serde_json::from_str(text)?]
        };

        let mut applied = 0;
        for msg in messages {
            match msg.event_type.as_str() {
                "book" => {
                    let book: BookMessage = serde_json::from_value(msg.data)?;
                    let levels = |raw: &[PriceLevel]| -> Vec<(Decimal, Decimal)> {
                        raw.iter()
                            .filter_map(|l| {
                                Some((parse_decimal(&l.price)?, parse_decimal(&l.size)?))
                            })
                            .filter(|(_, size)| *size > Decimal::ZERO)
                            .collect()
                    };
                    let (bids, asks) = (levels(&book.bids), levels(&book.asks));
                    if self.update(&book.asset_id, now, |b| b.apply_snapshot(bids, asks)) {
                        applied += 1;
                    }
                }
                "price_change" => {
                    let change: PriceChangeMessage = serde_json::from_value(msg.data)?;
                    let mut deltas: Vec<(String, String, String, String)> = change
                        .price_changes
                        .into_iter()
                        .map(|c| (c.asset_id, c.price, c.size, c.side))
                        .collect();
                    if let (Some(asset_id), Some(price), Some(size), Some(side)) =
                        (change.asset_id, change.price, change.size, change.side)
                    {
                        deltas.push((asset_id, price, size, side));
                    }
                    for (asset_id, price, size, side) in deltas {
                        let (Some(price), Some(size)) =
                            (parse_decimal(&price), parse_decimal(&size))
                        else {
                            continue;
                        };
                        let bid = is_bid(&side);
                        if self.update(&asset_id, now, |b| b.apply_delta(bid, price, size)) {
                            applied += 1;
                        }
                    }
                }
                "last_trade_price" => {
                    let trade: LastTradePriceMessage = serde_json::from_value(msg.data)?;
                    if let Some(price) = parse_decimal(&trade.price) {
                        if self.update(&trade.asset_id, now, |b| b.last_trade = Some(price)) {
                            applied += 1;
                        }
                    }
                }
                other => debug!(event_type = %other, "ignored market event"),
            }
        }
        Ok(applied)
    }

    /// Mutates the book of a subscribed token. Unsubscribed tokens are ignored.
    fn update(&self, token_id: &str, now: DateTime<Utc>, f: impl FnOnce(&mut TokenBook)) -> bool {
        if !self.shared.subscribed.read().iter().any(|t| t == token_id) {
            return false;
        }
        let mut books = self.shared.books.write();
        let book = books.entry(token_id.to_string()).or_default();
        f(book);
        book.updated_at = Some(now);
        true
    }
}

// =============================================================================
// Connection loop
// =============================================================================

async fn run_connection_loop(
    config: QuoteStreamConfig,
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let handle = QuoteStream {
        shared,
        commands: mpsc::unbounded_channel().0,
        stale_after: config.stale_after,
    };
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        while handle.shared.subscribed.read().is_empty() {
            match commands.recv().await {
                Some(Command::Subscribe(_)) => {}
                Some(Command::Shutdown) | None => return,
            }
        }

        info!(url = %config.url, "connecting market stream");
        match connect_and_run(&config, &handle, &mut commands).await {
            Ok(()) => {
                info!("market stream closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, delay = ?reconnect_delay, "market stream disconnected");
                tokio::select! {
                    _ = sleep(reconnect_delay) => {}
                    cmd = commands.recv() => {
                        if matches!(cmd, Some(Command::Shutdown) | None) {
                            return;
                        }
                    }
                }
                reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
            }
        }
    }
}

async fn connect_and_run(
    config: &QuoteStreamConfig,
    handle: &QuoteStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<(), QuoteStreamError> {
    let (ws_stream, _response) = connect_async(&config.url)
        .await
        .map_err(|e| QuoteStreamError::ConnectionFailed(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let tokens = handle.subscribed();
    let sub = serde_json::to_string(&SubscriptionMessage {
        assets_ids: &tokens,
        msg_type: "market",
    })?;
    write.send(Message::Text(sub)).await?;
    info!(tokens = tokens.len(), "market stream subscribed");

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Subscribe(tokens)) => {
                    let op = serde_json::to_string(&SubscriptionOp {
                        assets_ids: &tokens,
                        operation: "subscribe",
                    })?;
                    write.send(Message::Text(op)).await?;
                    debug!(added = tokens.len(), "subscription extended");
                }
                Some(Command::Shutdown) | None => {
                    let _ = write.close().await;
                    return Ok(());
                }
            },

            _ = ping.tick() => {
                write.send(Message::Ping(vec![])).await?;
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handle.apply_message(&text, Utc::now()) {
                        // The server also sends plain-text acknowledgements.
                        debug!(error = %e, "unparsed market message");
                    }
                }
                Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(frame))) => {
                    return Err(QuoteStreamError::ConnectionFailed(
                        frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by server".to_string()),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(QuoteStreamError::ConnectionFailed("stream ended".to_string())),
            },
        }
    }
}
