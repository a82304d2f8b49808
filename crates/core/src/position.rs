//! Position record owned by the lifecycle engine and persisted by the store.
//!
//! A position walks `PendingEntry -> Open -> Exiting -> Closed` and never
//! moves backwards. The record carries everything needed to evaluate exits
//! (window end, reference price, entry move) so a position restored from disk
//! is self-contained.

use crate::types::{Asset, Outcome};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    PendingEntry,
    Open,
    Exiting,
    Closed,
}

impl PositionStatus {
    /// The only status this one may advance to.
    #[must_use]
    pub fn successor(&self) -> Option<PositionStatus> {
        match self {
            PositionStatus::PendingEntry => Some(PositionStatus::Open),
            PositionStatus::Open => Some(PositionStatus::Exiting),
            PositionStatus::Exiting => Some(PositionStatus::Closed),
            PositionStatus::Closed => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid position transition {from:?} -> {to:?}")]
    Invalid {
        from: PositionStatus,
        to: PositionStatus,
    },

    #[error("fill size must be positive, got {0}")]
    NonPositiveFill(Decimal),
}

/// A directional holding in one outcome token of one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub window_id: String,
    pub asset: Asset,
    pub outcome: Outcome,
    pub token_id: String,
    pub window_end: DateTime<Utc>,
    /// Reference ("price to beat") of the window at entry.
    pub reference_price: Decimal,
    pub entry_price: Decimal,
    /// Shares still held.
    pub size: Decimal,
    /// Shares acquired by the entry fill.
    pub entry_size: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Absolute fractional displacement from reference at entry.
    pub entry_move: Decimal,
    /// Most recent dynamic take-profit level.
    pub target_price: Decimal,
    pub stop_price: Decimal,
    /// Highest quoted price seen while open.
    pub high_water: Decimal,
    pub status: PositionStatus,
    #[serde(default)]
    pub history: Vec<PositionStatus>,
    #[serde(default)]
    pub last_exit_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub realized_pnl: Decimal,
    #[serde(default)]
    pub exit_reason: Option<String>,
    #[serde(default)]
    pub restored: bool,
}

/// Inputs for a new pending entry.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: String,
    pub window_id: String,
    pub asset: Asset,
    pub outcome: Outcome,
    pub token_id: String,
    pub window_end: DateTime<Utc>,
    pub reference_price: Decimal,
    pub entry_move: Decimal,
    pub limit_price: Decimal,
    pub size: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Position {
    #[must_use]
    pub fn pending(entry: PendingEntry) -> Self {
        Self {
            id: entry.id,
            window_id: entry.window_id,
            asset: entry.asset,
            outcome: entry.outcome,
            token_id: entry.token_id,
            window_end: entry.window_end,
            reference_price: entry.reference_price,
            entry_price: entry.limit_price,
            size: entry.size,
            entry_size: Decimal::ZERO,
            entry_time: entry.created_at,
            entry_move: entry.entry_move,
            target_price: entry.limit_price,
            stop_price: Decimal::ZERO,
            high_water: entry.limit_price,
            status: PositionStatus::PendingEntry,
            history: vec![PositionStatus::PendingEntry],
            last_exit_attempt: None,
            realized_pnl: Decimal::ZERO,
            exit_reason: None,
            restored: false,
        }
    }

    fn advance(&mut self, to: PositionStatus) -> Result<(), TransitionError> {
        if self.status.successor() != Some(to) {
            return Err(TransitionError::Invalid {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.history.push(to);
        Ok(())
    }

    /// Applies the confirmed entry fill and opens the position.
    pub fn confirm_entry(
        &mut self,
        filled: Decimal,
        avg_price: Decimal,
        stop_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if filled <= Decimal::ZERO {
            return Err(TransitionError::NonPositiveFill(filled));
        }
        self.advance(PositionStatus::Open)?;
        self.entry_price = avg_price;
        self.size = filled;
        self.entry_size = filled;
        self.entry_time = at;
        self.stop_price = stop_price;
        self.target_price = avg_price;
        self.high_water = avg_price;
        Ok(())
    }

    /// Applies a confirmed exit fill. Returns the P&L realized by this fill.
    pub fn record_exit_fill(
        &mut self,
        filled: Decimal,
        avg_price: Decimal,
    ) -> Result<Decimal, TransitionError> {
        if filled <= Decimal::ZERO {
            return Err(TransitionError::NonPositiveFill(filled));
        }
        if self.status == PositionStatus::Open {
            self.advance(PositionStatus::Exiting)?;
        } else if self.status != PositionStatus::Exiting {
            return Err(TransitionError::Invalid {
                from: self.status,
                to: PositionStatus::Exiting,
            });
        }

        let filled = filled.min(self.size);
        let pnl = (avg_price - self.entry_price) * filled;
        self.size -= filled;
        self.realized_pnl += pnl;

        if self.size <= Decimal::ZERO {
            self.size = Decimal::ZERO;
            self.advance(PositionStatus::Closed)?;
        }
        Ok(pnl)
    }

    /// Settles the remaining shares against a confirmed resolution.
    /// Winning shares pay 1, losing shares pay 0.
    pub fn settle(&mut self, winner: Outcome) -> Result<Decimal, TransitionError> {
        let payout = if winner == self.outcome {
            Decimal::ONE
        } else {
            Decimal::ZERO
        };
        if self.status == PositionStatus::Open {
            self.advance(PositionStatus::Exiting)?;
        }
        let pnl = (payout - self.entry_price) * self.size;
        self.realized_pnl += pnl;
        self.size = Decimal::ZERO;
        self.advance(PositionStatus::Closed)?;
        Ok(pnl)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    #[must_use]
    pub fn cost_basis(&self) -> Decimal {
        self.entry_price * self.size
    }

    #[must_use]
    pub fn unrealized_pnl(&self, quoted: Decimal) -> Decimal {
        (quoted - self.entry_price) * self.size
    }

    /// Seconds until the window resolves (negative once it has ended).
    #[must_use]
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.window_end - now).num_seconds()
    }
}
