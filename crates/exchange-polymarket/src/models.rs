//! Gamma API payloads and the market window built from them.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use updown_core::{Asset, Outcome};

/// Length of one up/down window.
pub const WINDOW_SECS: i64 = 900;

/// Event returned by `GET /events?slug=`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

/// Token entry; only populated on some responses.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaToken {
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub winner: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    #[serde(default)]
    pub condition_id: String,
    #[serde(default)]
    pub question: Option<String>,
    /// JSON-encoded string array, Up first: `"[\"0.53\", \"0.47\"]"`.
    #[serde(default)]
    pub outcome_prices: Option<String>,
    /// JSON-encoded string array of token IDs, Up first.
    #[serde(default)]
    pub clob_token_ids: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub event_start_time: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub tokens: Option<Vec<GammaToken>>,
}

fn parse_string_pair(raw: &str) -> Option<(String, String)> {
    let values: Vec<String> = serde_json::from_str(raw).ok()?;
    match values.as_slice() {
        [first, second] => Some((first.clone(), second.clone())),
        _ => None,
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl GammaMarket {
    /// `(up, down)` quoted prices.
    #[must_use]
    pub fn parse_outcome_prices(&self) -> Option<(Decimal, Decimal)> {
        let (up, down) = parse_string_pair(self.outcome_prices.as_deref()?)?;
        Some((
            Decimal::from_str(up.trim()).ok()?,
            Decimal::from_str(down.trim()).ok()?,
        ))
    }

    /// `(up, down)` outcome token IDs.
    #[must_use]
    pub fn parse_token_ids(&self) -> Option<(String, String)> {
        let (up, down) = parse_string_pair(self.clob_token_ids.as_deref()?)?;
        if up.is_empty() || down.is_empty() {
            return None;
        }
        Some((up, down))
    }

    /// Winner if the market has resolved. Token winner flags take precedence;
    /// otherwise outcome prices of exactly 1/0 or 0/1 decide.
    #[must_use]
    pub fn resolved_winner(&self) -> Option<Outcome> {
        if let Some(tokens) = &self.tokens {
            if let Some(winner) = tokens.iter().find(|t| t.winner == Some(true)) {
                return match winner.outcome.to_ascii_lowercase().as_str() {
                    "up" | "yes" => Some(Outcome::Up),
                    "down" | "no" => Some(Outcome::Down),
                    _ => None,
                };
            }
        }

        let (up, down) = self.parse_outcome_prices()?;
        if up == Decimal::ONE && down == Decimal::ZERO {
            Some(Outcome::Up)
        } else if up == Decimal::ZERO && down == Decimal::ONE {
            Some(Outcome::Down)
        } else {
            None
        }
    }
}

/// Start of the window containing `time`, as unix seconds.
#[must_use]
pub fn window_start(time: DateTime<Utc>) -> i64 {
    time.timestamp().div_euclid(WINDOW_SECS) * WINDOW_SECS
}

/// Event slug and window ID: `{asset}-updown-15m-{start}`.
#[must_use]
pub fn window_slug(asset: Asset, start: i64) -> String {
    format!("{}-updown-15m-{}", asset.slug_prefix(), start)
}

/// A discovered 15-minute window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketWindow {
    /// Event slug.
    pub id: String,
    pub asset: Asset,
    pub condition_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub up_token_id: String,
    pub down_token_id: String,
    pub up_price: Option<Decimal>,
    pub down_price: Option<Decimal>,
}

impl MarketWindow {
    /// Builds a window from the first usable market of an event. `None` when
    /// token IDs are missing or malformed.
    #[must_use]
    pub fn from_event(asset: Asset, start_unix: i64, event: &GammaEvent) -> Option<Self> {
        let market = event.markets.iter().find(|m| m.parse_token_ids().is_some())?;
        let (up_token_id, down_token_id) = market.parse_token_ids()?;
        let prices = market.parse_outcome_prices();

        let slug_start = Utc.timestamp_opt(start_unix, 0).single()?;
        let start = market
            .event_start_time
            .as_deref()
            .and_then(parse_time)
            .unwrap_or(slug_start);
        let end = market
            .end_date
            .as_deref()
            .and_then(parse_time)
            .unwrap_or(start + Duration::seconds(WINDOW_SECS));

        Some(Self {
            id: window_slug(asset, start_unix),
            asset,
            condition_id: market.condition_id.clone(),
            start,
            end,
            up_token_id,
            down_token_id,
            up_price: prices.map(|(up, _)| up),
            down_price: prices.map(|(_, down)| down),
        })
    }

    #[must_use]
    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }

    #[must_use]
    pub fn price(&self, outcome: Outcome) -> Option<Decimal> {
        match outcome {
            Outcome::Up => self.up_price,
            Outcome::Down => self.down_price,
        }
    }

    /// Seconds since the window opened; negative before the start.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start).num_seconds()
    }

    #[must_use]
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.end - now).num_seconds().max(0)
    }

    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now >= self.start && now < self.end
    }
}
