//! Daily loss, loss-streak and exposure limits in front of every entry.
//!
//! The gate halts new entries when:
//! - realized losses for the UTC day reach the configured maximum
//! - consecutive losing closes reach the limit (followed by a pause)
//! - open exposure plus the requested stake would exceed the maximum
//!
//! Exits are never gated.
//!
//! # Example
//!
//! ```
//! use updown_engine::risk::DailyRiskGate;
//! use updown_core::RiskConfig;
//! use rust_decimal_macros::dec;
//!
//! let gate = DailyRiskGate::new(RiskConfig::default());
//! assert!(gate.can_trade().is_ok());
//!
//! gate.record_result(dec!(-10));
//! assert!(gate.can_trade().is_ok());
//! ```

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};
use updown_core::{EntryRequest, RiskConfig, RiskDecision, RiskGate};

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct RiskState {
    day: NaiveDate,
    daily_pnl: Decimal,
    consecutive_losses: u32,
    pause_started: Option<Instant>,
    exposure: Decimal,
    wins: u32,
    losses: u32,
    manually_tripped: bool,
}

impl RiskState {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            daily_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            pause_started: None,
            exposure: Decimal::ZERO,
            wins: 0,
            losses: 0,
            manually_tripped: false,
        }
    }

    /// Starts a new accounting day. Exposure and the trip flag carry over.
    fn roll_day(&mut self, today: NaiveDate) {
        if self.day != today {
            info!(previous = %self.day, pnl = %self.daily_pnl, "risk day rolled over");
            self.day = today;
            self.daily_pnl = Decimal::ZERO;
            self.consecutive_losses = 0;
            self.pause_started = None;
            self.wins = 0;
            self.losses = 0;
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Why the gate refuses new entries.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskError {
    #[error("daily loss limit exceeded: {current_loss} >= {max_loss}")]
    DailyLossExceeded {
        current_loss: Decimal,
        max_loss: Decimal,
    },

    #[error("max consecutive losses reached: {losses} >= {max_losses}")]
    ConsecutiveLossesExceeded { losses: u32, max_losses: u32 },

    #[error("risk gate paused, {remaining_secs} seconds remaining")]
    Paused { remaining_secs: u64 },

    #[error("exposure limit: {current} open + {requested} requested > {max}")]
    ExposureExceeded {
        current: Decimal,
        requested: Decimal,
        max: Decimal,
    },

    #[error("risk gate manually tripped")]
    ManuallyTripped,
}

// =============================================================================
// Gate
// =============================================================================

pub struct DailyRiskGate {
    config: RiskConfig,
    state: RwLock<RiskState>,
}

impl std::fmt::Debug for DailyRiskGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("DailyRiskGate")
            .field("config", &self.config)
            .field("daily_pnl", &state.daily_pnl)
            .field("consecutive_losses", &state.consecutive_losses)
            .field("exposure", &state.exposure)
            .field("is_paused", &state.pause_started.is_some())
            .finish()
    }
}

impl DailyRiskGate {
    #[must_use]
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RiskState::new(Utc::now().date_naive())),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn pause_duration(&self) -> Duration {
        Duration::from_secs(self.config.pause_secs)
    }

    /// Whether a new entry may be considered at all.
    ///
    /// # Errors
    ///
    /// - `RiskError::ManuallyTripped` - operator stop
    /// - `RiskError::DailyLossExceeded` - realized loss today at or over the limit
    /// - `RiskError::Paused` - inside the pause after a loss streak
    /// - `RiskError::ConsecutiveLossesExceeded` - streak still unbroken after the pause
    pub fn can_trade(&self) -> Result<(), RiskError> {
        {
            let today = Utc::now().date_naive();
            let mut state = self.state.write();
            state.roll_day(today);
        }
        let state = self.state.read();

        if state.manually_tripped {
            return Err(RiskError::ManuallyTripped);
        }

        let current_loss = -state.daily_pnl;
        if current_loss >= self.config.max_daily_loss {
            return Err(RiskError::DailyLossExceeded {
                current_loss,
                max_loss: self.config.max_daily_loss,
            });
        }

        if let Some(started) = state.pause_started {
            let elapsed = started.elapsed();
            if elapsed < self.pause_duration() {
                return Err(RiskError::Paused {
                    remaining_secs: (self.pause_duration() - elapsed).as_secs(),
                });
            }
            // Pause over: one more entry is allowed to try to break the streak.
            return Ok(());
        }

        if state.consecutive_losses >= self.config.max_consecutive_losses {
            return Err(RiskError::ConsecutiveLossesExceeded {
                losses: state.consecutive_losses,
                max_losses: self.config.max_consecutive_losses,
            });
        }

        Ok(())
    }

    /// Checks the gate and reserves `stake` of exposure in one step.
    pub fn reserve(&self, stake: Decimal) -> Result<(), RiskError> {
        self.can_trade()?;
        let mut state = self.state.write();
        if state.exposure + stake > self.config.max_exposure {
            return Err(RiskError::ExposureExceeded {
                current: state.exposure,
                requested: stake,
                max: self.config.max_exposure,
            });
        }
        state.exposure += stake;
        Ok(())
    }

    /// Books a closed position's realized P&L.
    pub fn record_result(&self, pnl: Decimal) {
        let mut state = self.state.write();
        state.roll_day(Utc::now().date_naive());
        state.daily_pnl += pnl;
        if pnl < Decimal::ZERO {
            state.losses += 1;
            state.consecutive_losses += 1;
            if state.consecutive_losses >= self.config.max_consecutive_losses {
                warn!(
                    losses = state.consecutive_losses,
                    pause_secs = self.config.pause_secs,
                    "loss streak, pausing entries"
                );
                state.pause_started = Some(Instant::now());
            }
        } else {
            state.wins += 1;
            state.consecutive_losses = 0;
            state.pause_started = None;
        }
    }

    pub fn release(&self, stake: Decimal) {
        let mut state = self.state.write();
        state.exposure = (state.exposure - stake).max(Decimal::ZERO);
    }

    /// Blocks entries until [`DailyRiskGate::reset`].
    pub fn trip(&self) {
        self.state.write().manually_tripped = true;
    }

    pub fn reset(&self) {
        *self.state.write() = RiskState::new(Utc::now().date_naive());
    }

    #[must_use]
    pub fn daily_pnl(&self) -> Decimal {
        self.state.read().daily_pnl
    }

    #[must_use]
    pub fn exposure(&self) -> Decimal {
        self.state.read().exposure
    }

    #[must_use]
    pub fn consecutive_losses(&self) -> u32 {
        self.state.read().consecutive_losses
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.remaining_pause().is_some()
    }

    #[must_use]
    pub fn remaining_pause(&self) -> Option<Duration> {
        let started = self.state.read().pause_started?;
        self.pause_duration().checked_sub(started.elapsed())
            .filter(|d| !d.is_zero())
    }

    /// Closes won and lost today.
    #[must_use]
    pub fn record(&self) -> (u32, u32) {
        let state = self.state.read();
        (state.wins, state.losses)
    }
}

#[async_trait]
impl RiskGate for DailyRiskGate {
    async fn approve_entry(&self, request: &EntryRequest) -> RiskDecision {
        match self.reserve(request.stake) {
            Ok(()) => RiskDecision::Approved,
            Err(e) => {
                info!(window = %request.window_id, reason = %e, "entry refused by risk gate");
                RiskDecision::Rejected(e.to_string())
            }
        }
    }

    async fn record_close(&self, realized_pnl: Decimal) {
        self.record_result(realized_pnl);
    }

    async fn release_exposure(&self, stake: Decimal) {
        self.release(stake);
    }
}
