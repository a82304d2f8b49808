use crate::position::Position;
use crate::types::{Asset, Outcome, PriceSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// A spot price source for the underlying assets.
pub trait PriceFeed: Send + Sync {
    fn name(&self) -> &str;

    /// Latest observation, regardless of age.
    fn current_price(&self, asset: Asset) -> Option<PriceSample>;

    /// Oldest observation still considered usable.
    fn max_age(&self) -> Duration;

    /// Latest observation if it is positive and no older than `max_age`.
    fn fresh_price(&self, asset: Asset, now: DateTime<Utc>) -> Option<PriceSample> {
        let sample = self.current_price(asset)?;
        let max_age_ms = i64::try_from(self.max_age().as_millis()).unwrap_or(i64::MAX);
        if sample.price <= Decimal::ZERO || sample.age_ms(now) > max_age_ms {
            return None;
        }
        Some(sample)
    }
}

/// What the lifecycle asks the risk gate before opening a position.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub window_id: String,
    pub asset: Asset,
    pub outcome: Outcome,
    pub price: Decimal,
    pub size: Decimal,
    pub stake: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    Approved,
    Rejected(String),
}

impl RiskDecision {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approved)
    }
}

#[async_trait]
pub trait RiskGate: Send + Sync {
    async fn approve_entry(&self, request: &EntryRequest) -> RiskDecision;

    /// Accounting update after a position closes.
    async fn record_close(&self, realized_pnl: Decimal);

    /// Capital released by a closed position (or an abandoned entry).
    async fn release_exposure(&self, _stake: Decimal) {}
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store contents are not valid JSON: {0}")]
    Format(String),
}

/// Durable record of open positions.
pub trait PositionStore: Send + Sync {
    fn load_open(&self) -> Result<Vec<Position>, StoreError>;
    fn save(&self, position: &Position) -> Result<(), StoreError>;
    fn remove(&self, position_id: &str) -> Result<(), StoreError>;
}
