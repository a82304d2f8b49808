//! Best available quote per outcome token.
//!
//! Sources are consulted in priority order: the market WebSocket stream,
//! then a direct CLOB midpoint query, then the outcome prices cached from
//! the last Gamma scan. A quote at or outside the `(0, 1)` bounds is treated
//! as no data; when every source fails the token has no quote at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use updown_core::PriceSample;
use updown_polymarket::{MarketWindow, PolymarketClient, QuoteStream};

/// A source of outcome-token prices.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &str;

    /// Current price of `token_id`, or `None` when unavailable.
    async fn quote(&self, token_id: &str) -> Option<Decimal>;
}

fn valid(price: Decimal) -> Option<Decimal> {
    (price > Decimal::ZERO && price < Decimal::ONE).then_some(price)
}

#[async_trait]
impl QuoteSource for QuoteStream {
    fn name(&self) -> &str {
        "stream"
    }

    async fn quote(&self, token_id: &str) -> Option<Decimal> {
        QuoteStream::quote(self, token_id, Utc::now())
    }
}

#[async_trait]
impl QuoteSource for PolymarketClient {
    fn name(&self) -> &str {
        "midpoint"
    }

    async fn quote(&self, token_id: &str) -> Option<Decimal> {
        match self.midpoint(token_id).await {
            Ok(mid) => Some(mid),
            Err(e) => {
                debug!(token = %token_id, error = %e, "midpoint query failed");
                None
            }
        }
    }
}

// =============================================================================
// Gamma cache
// =============================================================================

/// Outcome prices from the most recent discovery scan.
pub struct GammaQuoteCache {
    prices: RwLock<HashMap<String, PriceSample>>,
    stale_after: Duration,
}

impl GammaQuoteCache {
    #[must_use]
    pub fn new(stale_after: Duration) -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            stale_after,
        }
    }

    /// Caches both outcome prices of a discovered window.
    pub fn record(&self, window: &MarketWindow, at: DateTime<Utc>) {
        let mut prices = self.prices.write();
        for (token, price) in [
            (&window.up_token_id, window.up_price),
            (&window.down_token_id, window.down_price),
        ] {
            if let Some(price) = price {
                prices.insert(token.clone(), PriceSample::new(price, at));
            }
        }
    }

    #[must_use]
    pub fn get(&self, token_id: &str, now: DateTime<Utc>) -> Option<Decimal> {
        let sample = *self.prices.read().get(token_id)?;
        let max_age = i64::try_from(self.stale_after.as_millis()).unwrap_or(i64::MAX);
        (sample.age_ms(now) <= max_age).then_some(sample.price)
    }

    pub fn forget(&self, token_ids: &[String]) {
        let mut prices = self.prices.write();
        for token in token_ids {
            prices.remove(token);
        }
    }
}

#[async_trait]
impl QuoteSource for GammaQuoteCache {
    fn name(&self) -> &str {
        "gamma_cache"
    }

    async fn quote(&self, token_id: &str) -> Option<Decimal> {
        self.get(token_id, Utc::now())
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// The aggregator's view of one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub token_id: String,
    pub price: Decimal,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// Merges prioritized quote sources into one current price per token.
pub struct OddsAggregator {
    sources: Vec<Arc<dyn QuoteSource>>,
    latest: RwLock<HashMap<String, OddsQuote>>,
    max_age: Duration,
}

impl OddsAggregator {
    /// `sources` are consulted in the given order.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn QuoteSource>>, max_age: Duration) -> Self {
        Self {
            sources,
            latest: RwLock::new(HashMap::new()),
            max_age,
        }
    }

    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Queries the sources now and records the first valid answer.
    pub async fn quote_now(&self, token_id: &str) -> Option<OddsQuote> {
        for source in &self.sources {
            let Some(price) = source.quote(token_id).await.and_then(valid) else {
                continue;
            };
            let quote = OddsQuote {
                token_id: token_id.to_string(),
                price,
                source: source.name().to_string(),
                fetched_at: Utc::now(),
            };
            self.latest
                .write()
                .insert(token_id.to_string(), quote.clone());
            return Some(quote);
        }

        debug!(token = %token_id, "no source has a quote");
        self.latest.write().remove(token_id);
        None
    }

    /// Refreshes every token concurrently. Returns how many got a quote.
    pub async fn refresh(&self, token_ids: &[String]) -> usize {
        let lookups = token_ids.iter().map(|t| self.quote_now(t));
        futures_util::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .count()
    }

    /// Last recorded quote, if it is still fresh.
    #[must_use]
    pub fn latest(&self, token_id: &str) -> Option<OddsQuote> {
        let quote = self.latest.read().get(token_id).cloned()?;
        let age = (Utc::now() - quote.fetched_at).to_std().unwrap_or_default();
        (age <= self.max_age).then_some(quote)
    }

    pub fn forget(&self, token_ids: &[String]) {
        let mut latest = self.latest.write();
        for token in token_ids {
            latest.remove(token);
        }
    }
}
