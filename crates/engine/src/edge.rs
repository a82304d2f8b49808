//! Fair value, edge and sizing for one window.
//!
//! The model estimates how likely the current side of the reference is to
//! hold until resolution, compares that to the quoted price of the favored
//! outcome, and sizes a fractional-Kelly stake when the gap is wide enough.
//! The favored side is always the direction of the move; the model never
//! bets against it.
//!
//! ```text
//! pct        = (current - reference) / reference
//! fair       = clamp(0.5 + |pct| * move_weight * (1 + time_weight * elapsed), min_fair, max_fair)
//! edge       = fair - quoted(favored)
//! confidence = min(1, (|pct| * 200 + time_score) / 2)
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use updown_core::{Asset, EdgeConfig, KellySizer, Outcome};

use crate::reference::{SourcePrice, WindowReference};

// =============================================================================
// Inputs and outputs
// =============================================================================

/// Everything the model needs about one window at one instant.
#[derive(Debug, Clone)]
pub struct EdgeInput {
    pub window_id: String,
    pub asset: Asset,
    pub up_token_id: String,
    pub down_token_id: String,
    pub window_end: DateTime<Utc>,
    pub reference_price: Decimal,
    /// Fresh spot prices, one per independent feed.
    pub sources: Vec<SourcePrice>,
    pub up_price: Option<Decimal>,
    pub down_price: Option<Decimal>,
    pub seconds_remaining: i64,
    pub elapsed_fraction: f64,
    pub bankroll: Decimal,
}

impl EdgeInput {
    /// Builds the input from tracker state. `None` before the reference is captured.
    #[must_use]
    pub fn from_window(
        state: &WindowReference,
        sources: Vec<SourcePrice>,
        bankroll: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        Some(Self {
            window_id: state.window.id.clone(),
            asset: state.window.asset,
            up_token_id: state.window.up_token_id.clone(),
            down_token_id: state.window.down_token_id.clone(),
            window_end: state.window.end,
            reference_price: state.reference_price?,
            sources,
            up_price: state.up_price,
            down_price: state.down_price,
            seconds_remaining: state.window.seconds_remaining(now),
            elapsed_fraction: state.elapsed_fraction(now),
            bankroll,
        })
    }

    fn quoted(&self, outcome: Outcome) -> Option<Decimal> {
        match outcome {
            Outcome::Up => self.up_price,
            Outcome::Down => self.down_price,
        }
    }

    fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }
}

/// An accepted entry decision. Ephemeral: consumed by the lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub window_id: String,
    pub asset: Asset,
    pub outcome: Outcome,
    pub token_id: String,
    pub window_end: DateTime<Utc>,
    pub reference_price: Decimal,
    pub current_price: Decimal,
    /// Signed fractional displacement from the reference.
    pub displacement: Decimal,
    pub quoted: Decimal,
    pub fair: f64,
    pub edge: Decimal,
    pub confidence: f64,
    pub stake: Decimal,
    pub shares: Decimal,
    pub seconds_remaining: i64,
    pub justification: String,
}

/// Why a window produced no opportunity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("no reference price")]
    NoReference,

    #[error("no fresh price source")]
    NoSources,

    #[error("sources disagree")]
    SourcesDisagree,

    #[error("move {observed} below minimum {min}")]
    MoveTooSmall { observed: Decimal, min: Decimal },

    #[error("{remaining}s remaining, need {min}s")]
    TooLate { remaining: i64, min: i64 },

    #[error("no quote for {0}")]
    NoQuote(Outcome),

    #[error("price {price} outside entry band [{min}, {max})")]
    OutsideEntryBand {
        price: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("edge {edge} below minimum {min}")]
    EdgeTooSmall { edge: Decimal, min: Decimal },

    #[error("stake {stake} exceeds bankroll {bankroll}")]
    InsufficientBankroll { stake: Decimal, bankroll: Decimal },

    #[error("stake {stake} exceeds hard cap {cap}")]
    ExceedsHardCap { stake: Decimal, cap: Decimal },
}

impl Rejection {
    /// Human-readable reason, stable across releases.
    #[must_use]
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Short machine-friendly label for logs and counters.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NoReference => "no_reference",
            Rejection::NoSources => "no_sources",
            Rejection::SourcesDisagree => "sources_disagree",
            Rejection::MoveTooSmall { .. } => "move_too_small",
            Rejection::TooLate { .. } => "too_late",
            Rejection::NoQuote(_) => "no_quote",
            Rejection::OutsideEntryBand { .. } => "outside_entry_band",
            Rejection::EdgeTooSmall { .. } => "edge_too_small",
            Rejection::InsufficientBankroll { .. } => "insufficient_bankroll",
            Rejection::ExceedsHardCap { .. } => "exceeds_hard_cap",
        }
    }
}

/// Stake and share count for an entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sizing {
    pub stake: Decimal,
    pub shares: Decimal,
    pub kelly_fraction: f64,
}

// =============================================================================
// Model
// =============================================================================

#[derive(Debug, Clone)]
pub struct EdgeModel {
    config: EdgeConfig,
    sizer: KellySizer,
}

impl EdgeModel {
    #[must_use]
    pub fn new(config: EdgeConfig) -> Self {
        let sizer = KellySizer::new(config.kelly_fraction);
        Self { config, sizer }
    }

    #[must_use]
    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// Probability that the favored side holds. Increases with the size of
    /// the move and with elapsed time; never reaches 0 or 1.
    #[must_use]
    pub fn fair_probability(&self, abs_move: f64, elapsed_fraction: f64) -> f64 {
        let elapsed = elapsed_fraction.clamp(0.0, 1.0);
        let raw = 0.5
            + abs_move.abs() * self.config.move_weight * (1.0 + self.config.time_weight * elapsed);
        raw.max(self.config.min_fair).min(self.config.max_fair)
    }

    #[must_use]
    pub fn time_score(seconds_remaining: i64) -> f64 {
        match seconds_remaining {
            s if s > 600 => 0.3,
            s if s > 300 => 0.5,
            s if s > 120 => 0.7,
            _ => 0.9,
        }
    }

    #[must_use]
    pub fn confidence(&self, abs_move: f64, seconds_remaining: i64) -> f64 {
        ((abs_move.abs() * 200.0 + Self::time_score(seconds_remaining)) / 2.0).min(1.0)
    }

    /// Fractional Kelly scaled by move strength, bounded to the configured
    /// stake range, rounded to whole cents of shares and bumped to the
    /// exchange minimum.
    pub fn size(
        &self,
        fair: f64,
        price: Decimal,
        bankroll: Decimal,
        abs_move: Decimal,
    ) -> Result<Sizing, Rejection> {
        let kelly = self.sizer.size(fair, price, bankroll);

        let max_multiplier =
            Decimal::from_f64(self.config.max_move_multiplier).unwrap_or(Decimal::ONE);
        let multiplier = if self.config.min_move > Decimal::ZERO {
            (abs_move.abs() / self.config.min_move)
                .max(Decimal::ONE)
                .min(max_multiplier.max(Decimal::ONE))
        } else {
            Decimal::ONE
        };

        let target = (kelly.stake * multiplier)
            .max(self.config.min_stake)
            .min(self.config.max_stake);

        let mut shares = (target / price).round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if shares < self.config.min_shares {
            shares = self.config.min_shares;
        }
        let stake = shares * price;

        if stake > self.config.hard_cap {
            return Err(Rejection::ExceedsHardCap {
                stake,
                cap: self.config.hard_cap,
            });
        }
        if stake > bankroll {
            return Err(Rejection::InsufficientBankroll { stake, bankroll });
        }

        Ok(Sizing {
            stake,
            shares,
            kelly_fraction: kelly.applied_fraction,
        })
    }

    /// Runs every gate in order and returns the opportunity or the first
    /// reason to pass.
    pub fn evaluate(&self, input: &EdgeInput) -> Result<Opportunity, Rejection> {
        let reference = input.reference_price;
        if reference <= Decimal::ZERO {
            return Err(Rejection::NoReference);
        }
        if input.sources.is_empty() {
            return Err(Rejection::NoSources);
        }

        let signs: Vec<Option<Outcome>> = input
            .sources
            .iter()
            .map(|s| Outcome::from_displacement(s.price - reference))
            .collect();
        if signs.iter().any(|s| *s != signs[0]) {
            return Err(Rejection::SourcesDisagree);
        }

        let current: Decimal = input.sources.iter().map(|s| s.price).sum::<Decimal>()
            / Decimal::from(input.sources.len());
        let displacement = (current - reference) / reference;
        let abs_move = displacement.abs();

        let outcome = match Outcome::from_displacement(displacement) {
            Some(outcome) if abs_move >= self.config.min_move => outcome,
            _ => {
                return Err(Rejection::MoveTooSmall {
                    observed: abs_move.round_dp(6),
                    min: self.config.min_move,
                })
            }
        };

        if input.seconds_remaining < self.config.min_seconds_remaining {
            return Err(Rejection::TooLate {
                remaining: input.seconds_remaining,
                min: self.config.min_seconds_remaining,
            });
        }

        let quoted = input.quoted(outcome).ok_or(Rejection::NoQuote(outcome))?;
        if quoted < self.config.min_entry_price || quoted >= self.config.max_entry_price {
            return Err(Rejection::OutsideEntryBand {
                price: quoted,
                min: self.config.min_entry_price,
                max: self.config.max_entry_price,
            });
        }

        let abs_move_f = abs_move.to_f64().unwrap_or(0.0);
        let fair = self.fair_probability(abs_move_f, input.elapsed_fraction);
        let fair_dec = Decimal::from_f64(fair).unwrap_or(Decimal::ZERO).round_dp(6);
        let edge = fair_dec - quoted;
        if edge < self.config.min_edge {
            return Err(Rejection::EdgeTooSmall {
                edge,
                min: self.config.min_edge,
            });
        }

        let confidence = self.confidence(abs_move_f, input.seconds_remaining);
        let sizing = self.size(fair, quoted, input.bankroll, abs_move)?;

        let justification = format!(
            "{} moved {:.3}% from reference {}; fair {:.3} vs quoted {} (edge {}), {}s left",
            input.asset,
            displacement.to_f64().unwrap_or(0.0) * 100.0,
            reference,
            fair,
            quoted,
            edge.round_dp(4),
            input.seconds_remaining,
        );

        Ok(Opportunity {
            window_id: input.window_id.clone(),
            asset: input.asset,
            outcome,
            token_id: input.token_id(outcome).to_string(),
            window_end: input.window_end,
            reference_price: reference,
            current_price: current,
            displacement,
            quoted,
            fair,
            edge,
            confidence,
            stake: sizing.stake,
            shares: sizing.shares,
            seconds_remaining: input.seconds_remaining,
            justification,
        })
    }
}
