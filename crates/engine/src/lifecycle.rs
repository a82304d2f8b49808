//! Position lifecycle: entry, fill confirmation, exit evaluation and
//! settlement against confirmed resolutions.
//!
//! The engine owns every position through its [`PositionBook`]. A position
//! is created pending before the entry order is placed, becomes open only
//! once a fill is confirmed, and is removed from the book, the store and the
//! risk gate together when it closes.

use crate::book::{EntryBlocked, EntryLimits, PositionBook};
use crate::edge::Opportunity;
use crate::exit_rules::{ExitReason, ExitRules, MarketView};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use updown_core::{
    Asset, EngineEvent, EntryRequest, EventSink, LifecycleConfig, Outcome, PendingEntry, Position,
    PositionStatus, PositionStore, RiskDecision, RiskGate, TransitionError,
};
use updown_polymarket::clob::{ExecutionError, FillReport, OrderAck, OrderExecutor, OrderRequest};
use updown_polymarket::GammaClient;
use uuid::Uuid;

// =============================================================================
// Seams
// =============================================================================

/// Confirmed winner of a window, once the market has resolved.
#[async_trait]
pub trait ResolutionSource: Send + Sync {
    async fn resolution(&self, window_id: &str) -> Option<Outcome>;
}

#[async_trait]
impl ResolutionSource for GammaClient {
    async fn resolution(&self, window_id: &str) -> Option<Outcome> {
        match GammaClient::resolution(self, window_id).await {
            Ok(winner) => winner,
            Err(e) => {
                warn!(window_id, error = %e, "resolution lookup failed");
                None
            }
        }
    }
}

/// Current quotes and spot prices, as seen by exit evaluation.
pub trait MarketData: Send + Sync {
    fn quote(&self, token_id: &str) -> Option<Decimal>;
    fn spot(&self, asset: Asset) -> Option<Decimal>;
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("risk gate rejected entry: {0}")]
    RiskRejected(String),

    #[error(transparent)]
    Blocked(#[from] EntryBlocked),

    #[error("entry order failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("entry order {order_id} did not fill")]
    Unfilled { order_id: String },

    #[error("entry size rounds to zero")]
    ZeroSize,

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("position {0} left the book during entry")]
    Lost(String),
}

/// Outcome of one exit fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitReport {
    pub position_id: String,
    pub reason: ExitReason,
    pub filled: Decimal,
    pub avg_price: Decimal,
    pub realized_pnl: Decimal,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub position_id: String,
    pub window_id: String,
    pub winner: Outcome,
    pub realized_pnl: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleStats {
    pub entries_attempted: u64,
    pub entries_filled: u64,
    pub entries_unfilled: u64,
    pub entries_blocked: u64,
    pub entries_failed: u64,
    pub exits_triggered: u64,
    pub exits_filled: u64,
    pub exits_failed: u64,
    pub settlements: u64,
    pub closed: u64,
    pub wins: u64,
    pub losses: u64,
    pub realized_pnl: Decimal,
}

impl LifecycleStats {
    pub fn win_rate(&self) -> f64 {
        let total = self.wins + self.losses;
        if total == 0 {
            return 0.0;
        }
        self.wins as f64 / total as f64
    }

    pub fn fill_rate(&self) -> f64 {
        if self.entries_attempted == 0 {
            return 0.0;
        }
        self.entries_filled as f64 / self.entries_attempted as f64
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct LifecycleEngine {
    config: LifecycleConfig,
    rules: ExitRules,
    book: PositionBook,
    executor: Arc<dyn OrderExecutor>,
    risk: Arc<dyn RiskGate>,
    store: Arc<dyn PositionStore>,
    events: Arc<dyn EventSink>,
    stats: RwLock<LifecycleStats>,
}

impl std::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngine")
            .field("executor", &self.executor.name())
            .field("positions", &self.book.len())
            .field("stats", &*self.stats.read())
            .finish_non_exhaustive()
    }
}

impl LifecycleEngine {
    pub fn new(
        config: LifecycleConfig,
        rules: ExitRules,
        executor: Arc<dyn OrderExecutor>,
        risk: Arc<dyn RiskGate>,
        store: Arc<dyn PositionStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let rules = rules.with_hold_to_resolution(config.hold_to_resolution);
        Self {
            book: PositionBook::new(EntryLimits::from(&config)),
            config,
            rules,
            executor,
            risk,
            store,
            events,
            stats: RwLock::new(LifecycleStats::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    #[must_use]
    pub fn rules(&self) -> &ExitRules {
        &self.rules
    }

    #[must_use]
    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        self.book.open_positions()
    }

    #[must_use]
    pub fn stats(&self) -> LifecycleStats {
        self.stats.read().clone()
    }

    /// Adopts persisted positions after a restart. Returns how many were
    /// taken over.
    pub fn restore(&self, positions: Vec<Position>) -> usize {
        let mut adopted = 0;
        for mut position in positions {
            let holds_shares = matches!(
                position.status,
                PositionStatus::Open | PositionStatus::Exiting
            ) && position.size > Decimal::ZERO;
            if !holds_shares {
                debug!(
                    position_id = %position.id,
                    status = ?position.status,
                    "dropping persisted position"
                );
                self.forget_persisted(&position.id);
                continue;
            }
            position.restored = true;
            let id = position.id.clone();
            let window_id = position.window_id.clone();
            if self.book.adopt(position) {
                adopted += 1;
                info!(position_id = %id, window_id = %window_id, "restored position");
            }
        }
        adopted
    }

    // =========================================================================
    // Entry
    // =========================================================================

    /// Places the entry for `opportunity` and waits for its fill. The
    /// returned position is open with the confirmed size and price.
    pub async fn submit_opportunity(
        &self,
        opportunity: &Opportunity,
        now: DateTime<Utc>,
    ) -> Result<Position, EntryError> {
        self.stats.write().entries_attempted += 1;

        let request = OrderRequest::market_buy(
            &opportunity.token_id,
            opportunity.quoted,
            opportunity.shares,
            self.config.entry_slippage,
        );
        if request.size <= Decimal::ZERO {
            self.stats.write().entries_failed += 1;
            return Err(EntryError::ZeroSize);
        }
        // Worst-case cost at the limit price.
        let stake = request.price * request.size;

        let decision = self
            .risk
            .approve_entry(&EntryRequest {
                window_id: opportunity.window_id.clone(),
                asset: opportunity.asset,
                outcome: opportunity.outcome,
                price: request.price,
                size: request.size,
                stake,
            })
            .await;
        if let RiskDecision::Rejected(reason) = decision {
            self.stats.write().entries_blocked += 1;
            debug!(window_id = %opportunity.window_id, %reason, "entry rejected by risk gate");
            return Err(EntryError::RiskRejected(reason));
        }

        let pending = Position::pending(PendingEntry {
            id: Uuid::new_v4().to_string(),
            window_id: opportunity.window_id.clone(),
            asset: opportunity.asset,
            outcome: opportunity.outcome,
            token_id: opportunity.token_id.clone(),
            window_end: opportunity.window_end,
            reference_price: opportunity.reference_price,
            entry_move: opportunity.displacement.abs(),
            limit_price: request.price,
            size: request.size,
            created_at: now,
        });
        let position_id = pending.id.clone();
        if let Err(blocked) = self.book.reserve(pending, now) {
            self.risk.release_exposure(stake).await;
            self.stats.write().entries_blocked += 1;
            debug!(window_id = %opportunity.window_id, reason = %blocked, "entry blocked");
            return Err(blocked.into());
        }

        let ack = match self.executor.submit(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                self.abandon_entry(&position_id, stake).await;
                self.stats.write().entries_failed += 1;
                warn!(window_id = %opportunity.window_id, error = %e, "entry order failed");
                return Err(e.into());
            }
        };

        let report = self.confirm_fill(&ack, &request).await;
        if report.filled_size <= Decimal::ZERO {
            self.abandon_entry(&position_id, stake).await;
            self.stats.write().entries_unfilled += 1;
            info!(
                window_id = %opportunity.window_id,
                order_id = %ack.order_id,
                "entry did not fill"
            );
            return Err(EntryError::Unfilled {
                order_id: ack.order_id,
            });
        }

        let filled = report.filled_size.min(request.size);
        let avg_price = fill_price(&report, &request);
        let stop = self.rules.stop_price(avg_price);
        let rules = &self.rules;
        let confirmed = self.book.update(&position_id, |p| {
            p.confirm_entry(filled, avg_price, stop, now)?;
            p.target_price = rules.dynamic_target(p, None);
            Ok::<_, TransitionError>(p.clone())
        });
        let position = match confirmed {
            Some(Ok(position)) => position,
            Some(Err(e)) => {
                self.abandon_entry(&position_id, stake).await;
                self.stats.write().entries_failed += 1;
                return Err(e.into());
            }
            None => {
                self.risk.release_exposure(stake).await;
                self.stats.write().entries_failed += 1;
                return Err(EntryError::Lost(position_id));
            }
        };
        self.book.finish_entry(&position.window_id);

        let cost = avg_price * filled;
        if stake > cost {
            self.risk.release_exposure(stake - cost).await;
        }
        self.persist(&position);
        self.stats.write().entries_filled += 1;

        self.events.emit(&EngineEvent::PositionOpened {
            position_id: position.id.clone(),
            window_id: position.window_id.clone(),
            outcome: position.outcome,
            entry_price: position.entry_price,
            size: position.size,
        });
        info!(
            position_id = %position.id,
            window_id = %position.window_id,
            outcome = %position.outcome,
            entry = %position.entry_price,
            size = %position.size,
            stop = %position.stop_price,
            target = %position.target_price,
            justification = %opportunity.justification,
            "position opened"
        );
        Ok(position)
    }

    async fn abandon_entry(&self, position_id: &str, stake: Decimal) {
        self.book.rollback(position_id);
        self.risk.release_exposure(stake).await;
    }

    /// Polls the order until it reaches a terminal state. A still-live
    /// remainder is cancelled and the fill is read one final time.
    async fn confirm_fill(&self, ack: &OrderAck, request: &OrderRequest) -> FillReport {
        let mut last = FillReport {
            order_id: ack.order_id.clone(),
            status: ack.status,
            original_size: request.size,
            filled_size: Decimal::ZERO,
            avg_price: request.price,
        };
        let attempts = self.config.fill_poll_attempts.max(1);
        let interval = Duration::from_millis(self.config.fill_poll_interval_ms);

        for attempt in 0..attempts {
            match self.executor.fill_report(&ack.order_id).await {
                Ok(report) => {
                    last = report;
                    if last.status.is_terminal() {
                        return last;
                    }
                }
                Err(e) => warn!(order_id = %ack.order_id, attempt, error = %e, "fill poll failed"),
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        if let Err(e) = self.executor.cancel(&ack.order_id).await {
            warn!(order_id = %ack.order_id, error = %e, "cancel of unconfirmed order failed");
        }
        match self.executor.fill_report(&ack.order_id).await {
            Ok(report) => report,
            Err(_) => last,
        }
    }

    // =========================================================================
    // Exits
    // =========================================================================

    /// Evaluates every open position and executes the exits that trigger.
    pub async fn evaluate_exits(
        &self,
        market: &dyn MarketData,
        now: DateTime<Utc>,
    ) -> Vec<ExitReport> {
        let cooldown = self.rules.config().retry_cooldown_secs;
        let mut reports = Vec::new();

        for position in self.book.open_positions() {
            if let Some(last) = position.last_exit_attempt {
                if (now - last).num_seconds() < cooldown {
                    continue;
                }
            }
            // Ended windows wait for settlement.
            if position.seconds_remaining(now) <= 0 {
                continue;
            }
            let Some(quoted) = market.quote(&position.token_id) else {
                debug!(position_id = %position.id, "no quote, skipping exit check");
                continue;
            };
            let spot = market.spot(position.asset);
            let target = self.rules.dynamic_target(&position, spot);
            let Some(position) = self.book.update(&position.id, |p| {
                p.high_water = p.high_water.max(quoted);
                p.target_price = target;
                p.clone()
            }) else {
                continue;
            };

            let reason = if position.status == PositionStatus::Exiting {
                // Finish liquidating a partially exited position.
                position
                    .exit_reason
                    .as_deref()
                    .and_then(|r| r.parse().ok())
                    .or(Some(ExitReason::DangerZone))
            } else {
                self.rules.evaluate(&position, &MarketView { quoted, spot, now })
            };
            let Some(reason) = reason else {
                continue;
            };

            self.stats.write().exits_triggered += 1;
            self.events.emit(&EngineEvent::ExitTriggered {
                position_id: position.id.clone(),
                reason: reason.to_string(),
                quoted,
            });
            if let Some(report) = self.execute_exit(&position, quoted, reason, now).await {
                reports.push(report);
            }
        }
        reports
    }

    async fn execute_exit(
        &self,
        position: &Position,
        quoted: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Option<ExitReport> {
        self.book
            .update(&position.id, |p| p.last_exit_attempt = Some(now));

        let request = OrderRequest::market_sell(
            &position.token_id,
            quoted,
            position.size,
            self.config.exit_slippage,
        );
        if request.size <= Decimal::ZERO {
            warn!(position_id = %position.id, size = %position.size, "exit size rounds to zero");
            return None;
        }

        let ack = match self.executor.submit(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                self.stats.write().exits_failed += 1;
                warn!(
                    position_id = %position.id,
                    %reason,
                    error = %e,
                    retry_in_secs = self.rules.config().retry_cooldown_secs,
                    "exit order failed"
                );
                return None;
            }
        };
        let report = self.confirm_fill(&ack, &request).await;
        if report.filled_size <= Decimal::ZERO {
            self.stats.write().exits_failed += 1;
            warn!(
                position_id = %position.id,
                %reason,
                order_id = %ack.order_id,
                "exit did not fill"
            );
            return None;
        }

        let avg_price = fill_price(&report, &request);
        let filled = report.filled_size;
        let applied = self.book.update(&position.id, |p| {
            if p.exit_reason.is_none() {
                p.exit_reason = Some(reason.to_string());
            }
            p.record_exit_fill(filled, avg_price)
                .map(|pnl| (pnl, p.clone()))
        });
        let (pnl, updated) = match applied {
            Some(Ok(applied)) => applied,
            Some(Err(e)) => {
                warn!(position_id = %position.id, error = %e, "could not apply exit fill");
                return None;
            }
            None => return None,
        };
        self.stats.write().exits_filled += 1;

        let closed = updated.status == PositionStatus::Closed;
        if closed {
            self.close_position(&updated, reason).await;
        } else {
            info!(
                position_id = %updated.id,
                %reason,
                filled = %filled,
                remaining = %updated.size,
                "partial exit"
            );
            self.persist(&updated);
        }

        Some(ExitReport {
            position_id: updated.id,
            reason,
            filled: filled.min(position.size),
            avg_price,
            realized_pnl: pnl,
            closed,
        })
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Settles positions whose window has ended, but only for windows with
    /// a confirmed winner. Unresolved windows are retried on the next call.
    pub async fn settle_resolved(
        &self,
        resolver: &dyn ResolutionSource,
        now: DateTime<Utc>,
    ) -> Vec<Settlement> {
        let ended: Vec<Position> = self
            .book
            .open_positions()
            .into_iter()
            .filter(|p| p.window_end <= now)
            .collect();
        let windows: BTreeSet<String> = ended.iter().map(|p| p.window_id.clone()).collect();

        let mut settlements = Vec::new();
        for window_id in windows {
            let Some(winner) = resolver.resolution(&window_id).await else {
                debug!(%window_id, "awaiting resolution");
                continue;
            };
            self.events.emit(&EngineEvent::ResolutionConfirmed {
                window_id: window_id.clone(),
                winner,
            });

            for position in ended.iter().filter(|p| p.window_id == window_id) {
                let settled = self.book.update(&position.id, |p| {
                    if p.exit_reason.is_none() {
                        p.exit_reason = Some(ExitReason::Resolution.to_string());
                    }
                    p.settle(winner).map(|pnl| (pnl, p.clone()))
                });
                match settled {
                    Some(Ok((pnl, updated))) => {
                        self.stats.write().settlements += 1;
                        self.close_position(&updated, ExitReason::Resolution).await;
                        settlements.push(Settlement {
                            position_id: updated.id,
                            window_id: window_id.clone(),
                            winner,
                            realized_pnl: pnl,
                        });
                    }
                    Some(Err(e)) => {
                        warn!(position_id = %position.id, error = %e, "could not settle position");
                    }
                    None => {}
                }
            }
        }
        settlements
    }

    async fn close_position(&self, position: &Position, reason: ExitReason) {
        self.book.remove(&position.id);
        self.forget_persisted(&position.id);
        self.risk.record_close(position.realized_pnl).await;
        if !position.restored {
            self.risk
                .release_exposure(position.entry_price * position.entry_size)
                .await;
        }

        {
            let mut stats = self.stats.write();
            stats.closed += 1;
            stats.realized_pnl += position.realized_pnl;
            if position.realized_pnl > Decimal::ZERO {
                stats.wins += 1;
            } else if position.realized_pnl < Decimal::ZERO {
                stats.losses += 1;
            }
        }

        self.events.emit(&EngineEvent::PositionClosed {
            position_id: position.id.clone(),
            window_id: position.window_id.clone(),
            realized_pnl: position.realized_pnl,
            reason: reason.to_string(),
        });
        info!(
            position_id = %position.id,
            window_id = %position.window_id,
            %reason,
            pnl = %position.realized_pnl,
            "position closed"
        );
    }

    fn persist(&self, position: &Position) {
        if let Err(e) = self.store.save(position) {
            warn!(position_id = %position.id, error = %e, "failed to persist position");
        }
    }

    fn forget_persisted(&self, position_id: &str) {
        if let Err(e) = self.store.remove(position_id) {
            warn!(%position_id, error = %e, "failed to remove persisted position");
        }
    }
}

fn fill_price(report: &FillReport, request: &OrderRequest) -> Decimal {
    if report.avg_price > Decimal::ZERO {
        report.avg_price
    } else {
        request.price
    }
}
