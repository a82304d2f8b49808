//! Polymarket integration for 15-minute up/down windows.
//!
//! This crate provides:
//! - Gamma window discovery and resolution lookup
//! - Public CLOB price queries and the market WebSocket quote stream
//! - Binance and Coinbase spot price feeds
//! - EIP-712 order signing, L1/L2 authentication and the trading client
//!
//! # Example
//!
//! ```no_run
//! use updown_polymarket::GammaClient;
//! use updown_core::Asset;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gamma = GammaClient::new();
//!     for window in gamma.discover(Asset::all(), chrono::Utc::now()).await {
//!         println!("{} up={:?} down={:?}", window.id, window.up_price, window.down_price);
//!     }
//! }
//! ```

pub mod client;
pub mod clob;
pub mod gamma;
pub mod models;
pub mod spot_feed;
pub mod websocket;

pub use client::PolymarketClient;
pub use gamma::{GammaClient, GammaError};
pub use models::{window_slug, window_start, GammaEvent, GammaMarket, MarketWindow, WINDOW_SECS};
pub use spot_feed::{BinanceFeed, BinanceFeedConfig, CoinbaseFeed, SpotFeedError, SpotPriceStore};
pub use websocket::{QuoteStream, QuoteStreamConfig, QuoteStreamError, TokenBook};
