//! The seam between the lifecycle engine and an exchange: place, poll,
//! cancel, and read balance. Implemented by the live CLOB client and by
//! the paper executor.

use super::order::OrderRequest;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exchange-reported order state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Resting or still being processed.
    Live,
    /// Accepted but matching is delayed.
    Delayed,
    /// Fully or partially matched; remainder (if any) killed.
    Matched,
    /// Accepted but nothing matched; nothing rests.
    Unmatched,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Case-insensitive mapping of the exchange's status strings.
    #[must_use]
    pub fn from_wire(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "matched" | "filled" | "mined" | "confirmed" => OrderStatus::Matched,
            "delayed" => OrderStatus::Delayed,
            "unmatched" => OrderStatus::Unmatched,
            "canceled" | "cancelled" | "canceled_market_resolved" => OrderStatus::Cancelled,
            "rejected" | "failed" => OrderStatus::Rejected,
            _ => OrderStatus::Live,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Matched
                | OrderStatus::Unmatched
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
        )
    }
}

/// Immediate response to an order placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
}

/// Fill state of a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: String,
    pub status: OrderStatus,
    pub original_size: Decimal,
    pub filled_size: Decimal,
    /// Average fill price. Executors report the matched price when they know
    /// it and fall back to the limit price; zero means neither was known.
    pub avg_price: Decimal,
}

impl FillReport {
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        (self.original_size - self.filled_size).max(Decimal::ZERO)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.filled_size >= self.original_size
    }
}

#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("rate limited by exchange")]
    RateLimited,

    #[error("exchange error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("order {0} not found")]
    NotFound(String),
}

impl ExecutionError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::RateLimited | ExecutionError::Network(_) => true,
            ExecutionError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait OrderExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, request: &OrderRequest) -> Result<OrderAck, ExecutionError>;

    async fn fill_report(&self, order_id: &str) -> Result<FillReport, ExecutionError>;

    async fn cancel(&self, order_id: &str) -> Result<(), ExecutionError>;

    /// Spendable collateral in USDC.
    async fn balance(&self) -> Result<Decimal, ExecutionError>;
}
