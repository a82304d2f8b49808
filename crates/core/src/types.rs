//! Domain primitives shared by every crate in the workspace.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Underlying asset of a 15-minute up/down window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Asset {
    Btc,
    Eth,
    Sol,
    Xrp,
}

impl Asset {
    /// Every supported asset, in discovery order.
    #[must_use]
    pub fn all() -> &'static [Asset] {
        &[Asset::Btc, Asset::Eth, Asset::Sol, Asset::Xrp]
    }

    /// Prefix used in event slugs (`btc-updown-15m-...`).
    #[must_use]
    pub fn slug_prefix(&self) -> &'static str {
        match self {
            Asset::Btc => "btc",
            Asset::Eth => "eth",
            Asset::Sol => "sol",
            Asset::Xrp => "xrp",
        }
    }

    /// Binance stream symbol (lowercase, USDT quoted).
    #[must_use]
    pub fn binance_symbol(&self) -> &'static str {
        match self {
            Asset::Btc => "btcusdt",
            Asset::Eth => "ethusdt",
            Asset::Sol => "solusdt",
            Asset::Xrp => "xrpusdt",
        }
    }

    /// Coinbase currency pair.
    #[must_use]
    pub fn coinbase_pair(&self) -> &'static str {
        match self {
            Asset::Btc => "BTC-USD",
            Asset::Eth => "ETH-USD",
            Asset::Sol => "SOL-USD",
            Asset::Xrp => "XRP-USD",
        }
    }

    /// Maps a Binance symbol back to its asset.
    #[must_use]
    pub fn from_binance_symbol(symbol: &str) -> Option<Asset> {
        let symbol = symbol.to_lowercase();
        Asset::all()
            .iter()
            .copied()
            .find(|a| a.binance_symbol() == symbol)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug_prefix())
    }
}

impl FromStr for Asset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "btc" | "bitcoin" => Ok(Asset::Btc),
            "eth" | "ethereum" => Ok(Asset::Eth),
            "sol" | "solana" => Ok(Asset::Sol),
            "xrp" => Ok(Asset::Xrp),
            other => Err(format!("unknown asset '{other}'")),
        }
    }
}

/// One side of a binary up/down window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Up,
    Down,
}

impl Outcome {
    #[must_use]
    pub fn opposite(&self) -> Outcome {
        match self {
            Outcome::Up => Outcome::Down,
            Outcome::Down => Outcome::Up,
        }
    }

    /// Direction implied by a signed displacement; `None` for zero.
    #[must_use]
    pub fn from_displacement(displacement: Decimal) -> Option<Outcome> {
        if displacement > Decimal::ZERO {
            Some(Outcome::Up)
        } else if displacement < Decimal::ZERO {
            Some(Outcome::Down)
        } else {
            None
        }
    }

    /// True when `live` sits on this outcome's winning side of `reference`.
    #[must_use]
    pub fn is_winning(&self, reference: Decimal, live: Decimal) -> bool {
        match self {
            Outcome::Up => live > reference,
            Outcome::Down => live < reference,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Up => f.write_str("UP"),
            Outcome::Down => f.write_str("DOWN"),
        }
    }
}

/// A price observation and the time it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl PriceSample {
    #[must_use]
    pub fn new(price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self { price, observed_at }
    }

    /// Age of the sample at `now`, in milliseconds (never negative).
    #[must_use]
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.observed_at).num_milliseconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn asset_parses_names_and_symbols() {
        assert_eq!("BTC".parse::<Asset>().unwrap(), Asset::Btc);
        assert_eq!("ethereum".parse::<Asset>().unwrap(), Asset::Eth);
        assert!("doge".parse::<Asset>().is_err());
        assert_eq!(Asset::from_binance_symbol("SOLUSDT"), Some(Asset::Sol));
        assert_eq!(Asset::from_binance_symbol("dogeusdt"), None);
    }

    #[test]
    fn outcome_follows_displacement_sign() {
        assert_eq!(Outcome::from_displacement(dec!(0.01)), Some(Outcome::Up));
        assert_eq!(Outcome::from_displacement(dec!(-0.01)), Some(Outcome::Down));
        assert_eq!(Outcome::from_displacement(Decimal::ZERO), None);
    }

    #[test]
    fn outcome_winning_side() {
        assert!(Outcome::Up.is_winning(dec!(100), dec!(101)));
        assert!(!Outcome::Up.is_winning(dec!(100), dec!(100)));
        assert!(Outcome::Down.is_winning(dec!(100), dec!(99)));
        assert_eq!(Outcome::Down.opposite(), Outcome::Up);
    }

    #[test]
    fn asset_serializes_lowercase() {
        let json = serde_json::to_string(&Asset::Xrp).unwrap();
        assert_eq!(json, "\"xrp\"");
    }
}
