//! Exit decisions for open positions.
//!
//! Each rule maps (position, market) to an exit reason or nothing and can be
//! tested on its own. [`ExitRules::evaluate`] applies them in priority order
//! and returns the first match.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use updown_core::{ExitConfig, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    DangerZone,
    StopLoss,
    Reversal,
    Target,
    TrailingStop,
    MinProfit,
    Resolution,
}

impl ExitReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::DangerZone => "danger_zone",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Reversal => "reversal",
            ExitReason::Target => "target",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::MinProfit => "min_profit",
            ExitReason::Resolution => "resolution",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "danger_zone" => Ok(ExitReason::DangerZone),
            "stop_loss" => Ok(ExitReason::StopLoss),
            "reversal" => Ok(ExitReason::Reversal),
            "target" => Ok(ExitReason::Target),
            "trailing_stop" => Ok(ExitReason::TrailingStop),
            "min_profit" => Ok(ExitReason::MinProfit),
            "resolution" => Ok(ExitReason::Resolution),
            other => Err(format!("unknown exit reason '{other}'")),
        }
    }
}

/// What the market looks like for one position right now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketView {
    /// Current quote of the position's outcome token.
    pub quoted: Decimal,
    /// Current underlying spot price, when a fresh one exists.
    pub spot: Option<Decimal>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExitRules {
    config: ExitConfig,
    hold_to_resolution: bool,
}

impl ExitRules {
    #[must_use]
    pub fn new(config: ExitConfig) -> Self {
        Self {
            config,
            hold_to_resolution: false,
        }
    }

    /// Disables the forced exit near resolution.
    #[must_use]
    pub fn with_hold_to_resolution(mut self, hold: bool) -> Self {
        self.hold_to_resolution = hold;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// Stop level for a fill at `entry`.
    #[must_use]
    pub fn stop_price(&self, entry: Decimal) -> Decimal {
        entry * (Decimal::ONE - self.config.stop_loss_fraction)
    }

    /// Displacement from reference in the position's favor, relative to the
    /// displacement at entry. `None` without a spot price or entry move.
    #[must_use]
    pub fn move_ratio(&self, position: &Position, spot: Option<Decimal>) -> Option<Decimal> {
        let spot = spot?;
        if position.entry_move <= Decimal::ZERO || position.reference_price <= Decimal::ZERO {
            return None;
        }
        let raw = (spot - position.reference_price) / position.reference_price;
        let favorable = match position.outcome {
            updown_core::Outcome::Up => raw,
            updown_core::Outcome::Down => -raw,
        };
        Some((favorable / position.entry_move).max(Decimal::ZERO))
    }

    /// Take-profit level. Scales with how much of the entry move survives,
    /// floored at `entry * (1 + min_markup)` and capped at the ceiling.
    #[must_use]
    pub fn dynamic_target(&self, position: &Position, spot: Option<Decimal>) -> Decimal {
        let entry = position.entry_price;
        let ratio = self.move_ratio(position, spot).unwrap_or(Decimal::ONE);
        let raw = entry * (Decimal::ONE + self.config.target_markup * ratio);
        let ceiling = self.config.target_ceiling;
        let floor = (entry * (Decimal::ONE + self.config.min_markup)).min(ceiling);
        raw.max(floor).min(ceiling)
    }

    // =========================================================================
    // Individual rules
    // =========================================================================

    pub fn danger_zone(&self, position: &Position, market: &MarketView) -> Option<ExitReason> {
        if self.hold_to_resolution {
            return None;
        }
        (position.seconds_remaining(market.now) < self.config.danger_zone_secs)
            .then_some(ExitReason::DangerZone)
    }

    pub fn stop_loss(&self, position: &Position, market: &MarketView) -> Option<ExitReason> {
        (position.stop_price > Decimal::ZERO && market.quoted <= position.stop_price)
            .then_some(ExitReason::StopLoss)
    }

    /// The underlying has crossed back through the reference.
    pub fn reversal(&self, position: &Position, market: &MarketView) -> Option<ExitReason> {
        let spot = market.spot?;
        position
            .outcome
            .opposite()
            .is_winning(position.reference_price, spot)
            .then_some(ExitReason::Reversal)
    }

    pub fn target(&self, position: &Position, market: &MarketView) -> Option<ExitReason> {
        (market.quoted >= self.dynamic_target(position, market.spot)).then_some(ExitReason::Target)
    }

    /// Armed once the quote has risen `trailing_activation` above entry;
    /// fires on a `trailing_distance` pullback from the high-water mark.
    pub fn trailing_stop(&self, position: &Position, market: &MarketView) -> Option<ExitReason> {
        let high = position.high_water.max(market.quoted);
        let armed = high >= position.entry_price + self.config.trailing_activation;
        (armed && market.quoted <= high - self.config.trailing_distance)
            .then_some(ExitReason::TrailingStop)
    }

    /// Take a small profit once the move has faded.
    pub fn min_profit(&self, position: &Position, market: &MarketView) -> Option<ExitReason> {
        let ratio = self.move_ratio(position, market.spot)?;
        let floor = position.entry_price * (Decimal::ONE + self.config.min_profit_markup);
        (ratio < self.config.weak_move_ratio && market.quoted >= floor)
            .then_some(ExitReason::MinProfit)
    }

    /// First matching rule. A stop-loss that holds together with the danger
    /// zone is reported as the stop.
    #[must_use]
    pub fn evaluate(&self, position: &Position, market: &MarketView) -> Option<ExitReason> {
        if self.danger_zone(position, market).is_some() {
            return self
                .stop_loss(position, market)
                .or(Some(ExitReason::DangerZone));
        }
        self.stop_loss(position, market)
            .or_else(|| self.reversal(position, market))
            .or_else(|| self.target(position, market))
            .or_else(|| self.trailing_stop(position, market))
            .or_else(|| self.min_profit(position, market))
    }
}
