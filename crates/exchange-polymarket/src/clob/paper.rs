//! Simulated executor for dry runs.
//!
//! Orders fill at their limit price with configurable fill and partial-fill
//! probabilities. Balance and token holdings are tracked so sizing and
//! exits behave as they would against the exchange.

use super::eip712::Side;
use super::execution::{ExecutionError, FillReport, OrderAck, OrderExecutor, OrderStatus};
use super::order::{OrderRequest, OrderType};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperExecutorConfig {
    pub initial_balance: Decimal,

    /// Probability that an order fills at all.
    pub fill_rate: f64,

    /// Given a fill, probability that a FAK order only partially fills.
    pub partial_fill_rate: f64,

    pub min_partial_fill_pct: f64,
    pub max_partial_fill_pct: f64,

    pub simulate_latency_ms: u64,

    /// Fixed seed for reproducible runs.
    pub random_seed: Option<u64>,
}

impl Default for PaperExecutorConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(1000),
            fill_rate: 0.95,
            partial_fill_rate: 0.10,
            min_partial_fill_pct: 0.25,
            max_partial_fill_pct: 0.95,
            simulate_latency_ms: 0,
            random_seed: None,
        }
    }
}

impl PaperExecutorConfig {
    #[must_use]
    pub fn with_balance(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            ..Default::default()
        }
    }

    /// Every order fills completely.
    #[must_use]
    pub fn always_fill() -> Self {
        Self {
            fill_rate: 1.0,
            partial_fill_rate: 0.0,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn fill_rate(mut self, rate: f64) -> Self {
        self.fill_rate = rate.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn partial_fill_rate(mut self, rate: f64) -> Self {
        self.partial_fill_rate = rate.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }
}

// =============================================================================
// Executor
// =============================================================================

#[derive(Debug)]
struct PaperState {
    balance: Decimal,
    holdings: HashMap<String, Decimal>,
    orders: HashMap<String, FillReport>,
    submitted: u32,
    filled: u32,
}

pub struct PaperExecutor {
    config: PaperExecutorConfig,
    state: RwLock<PaperState>,
    rng: RwLock<StdRng>,
}

impl std::fmt::Debug for PaperExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperExecutor")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PaperExecutor {
    #[must_use]
    pub fn new(config: PaperExecutorConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            state: RwLock::new(PaperState {
                balance: config.initial_balance,
                holdings: HashMap::new(),
                orders: HashMap::new(),
                submitted: 0,
                filled: 0,
            }),
            rng: RwLock::new(rng),
            config,
        }
    }

    #[must_use]
    pub fn holding(&self, token_id: &str) -> Decimal {
        self.state
            .read()
            .holdings
            .get(token_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    #[must_use]
    pub fn orders_submitted(&self) -> u32 {
        self.state.read().submitted
    }

    #[must_use]
    pub fn orders_filled(&self) -> u32 {
        self.state.read().filled
    }

    /// Simulated quantity filled for `requested` shares.
    fn simulate_fill(&self, request: &OrderRequest) -> Decimal {
        let mut rng = self.rng.write();
        if rng.gen::<f64>() >= self.config.fill_rate {
            return Decimal::ZERO;
        }
        let partial_allowed = request.order_type != OrderType::Fok;
        if partial_allowed && rng.gen::<f64>() < self.config.partial_fill_rate {
            let low = self.config.min_partial_fill_pct.min(self.config.max_partial_fill_pct);
            let high = self.config.max_partial_fill_pct.max(low);
            let pct = rng.gen_range(low..=high);
            let pct = Decimal::from_f64(pct).unwrap_or(dec!(0.5));
            return (request.size * pct).round_dp(2);
        }
        request.size
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderAck, ExecutionError> {
        if self.config.simulate_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.simulate_latency_ms)).await;
        }
        if request.price <= Decimal::ZERO || request.price >= Decimal::ONE {
            return Err(ExecutionError::InvalidOrder(format!(
                "price {} outside (0, 1)",
                request.price
            )));
        }
        if request.size <= Decimal::ZERO {
            return Err(ExecutionError::InvalidOrder("size must be positive".to_string()));
        }

        let fill = self.simulate_fill(request);
        let order_id = format!("paper-{}", Uuid::new_v4());
        let mut state = self.state.write();
        state.submitted += 1;

        match request.side {
            Side::Buy => {
                let cost = fill * request.price;
                if request.size * request.price > state.balance {
                    return Err(ExecutionError::InsufficientBalance(format!(
                        "need {}, have {}",
                        request.size * request.price,
                        state.balance
                    )));
                }
                state.balance -= cost;
                *state.holdings.entry(request.token_id.clone()).or_default() += fill;
            }
            Side::Sell => {
                let held = state
                    .holdings
                    .get(&request.token_id)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                if request.size > held {
                    return Err(ExecutionError::InsufficientBalance(format!(
                        "selling {} shares, holding {held}",
                        request.size
                    )));
                }
                state.balance += fill * request.price;
                let remaining = held - fill;
                if remaining <= Decimal::ZERO {
                    state.holdings.remove(&request.token_id);
                } else {
                    state.holdings.insert(request.token_id.clone(), remaining);
                }
            }
        }

        let status = if fill > Decimal::ZERO {
            state.filled += 1;
            OrderStatus::Matched
        } else {
            OrderStatus::Unmatched
        };
        debug!(
            %order_id,
            side = %request.side,
            price = %request.price,
            size = %request.size,
            filled = %fill,
            "paper order"
        );

        state.orders.insert(
            order_id.clone(),
            FillReport {
                order_id: order_id.clone(),
                status,
                original_size: request.size,
                filled_size: fill,
                avg_price: request.price,
            },
        );
        Ok(OrderAck { order_id, status })
    }

    async fn fill_report(&self, order_id: &str) -> Result<FillReport, ExecutionError> {
        self.state
            .read()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExecutionError::NotFound(order_id.to_string()))
    }

    async fn cancel(&self, order_id: &str) -> Result<(), ExecutionError> {
        // FAK remainders never rest, so cancelling only marks the record.
        let mut state = self.state.write();
        let report = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| ExecutionError::NotFound(order_id.to_string()))?;
        if report.filled_size.is_zero() {
            report.status = OrderStatus::Cancelled;
        }
        Ok(())
    }

    async fn balance(&self) -> Result<Decimal, ExecutionError> {
        Ok(self.state.read().balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy(size: Decimal) -> OrderRequest {
        OrderRequest::market_buy("up-token", dec!(0.40), size, dec!(0.02))
    }

    #[tokio::test]
    async fn buy_then_sell_round_trips_balance() {
        let executor = PaperExecutor::new(PaperExecutorConfig::always_fill());

        let ack = executor.submit(&buy(dec!(10))).await.unwrap();
        assert!(ack.order_id.starts_with("paper-"));
        assert_eq!(ack.status, OrderStatus::Matched);
        assert_eq!(executor.balance().await.unwrap(), dec!(995.80));
        assert_eq!(executor.holding("up-token"), dec!(10));

        let sell = OrderRequest::market_sell("up-token", dec!(0.60), dec!(10), dec!(0.03));
        executor.submit(&sell).await.unwrap();
        assert_eq!(executor.balance().await.unwrap(), dec!(1001.50));
        assert_eq!(executor.holding("up-token"), Decimal::ZERO);
    }

    #[tokio::test]
    async fn never_filling_leaves_state_untouched() {
        let executor =
            PaperExecutor::new(PaperExecutorConfig::default().fill_rate(0.0).seed(7));
        let ack = executor.submit(&buy(dec!(10))).await.unwrap();
        assert_eq!(ack.status, OrderStatus::Unmatched);

        let report = executor.fill_report(&ack.order_id).await.unwrap();
        assert_eq!(report.filled_size, Decimal::ZERO);
        assert_eq!(executor.balance().await.unwrap(), dec!(1000));

        executor.cancel(&ack.order_id).await.unwrap();
        let report = executor.fill_report(&ack.order_id).await.unwrap();
        assert_eq!(report.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn partial_fills_stay_within_bounds() {
        let executor = PaperExecutor::new(
            PaperExecutorConfig::always_fill()
                .partial_fill_rate(1.0)
                .seed(42),
        );
        let ack = executor.submit(&buy(dec!(20))).await.unwrap();
        let report = executor.fill_report(&ack.order_id).await.unwrap();
        assert!(report.filled_size >= dec!(5));
        assert!(report.filled_size <= dec!(19));
        assert_eq!(report.remaining(), dec!(20) - report.filled_size);
    }

    #[tokio::test]
    async fn rejects_spending_more_than_balance() {
        let executor = PaperExecutor::new(PaperExecutorConfig {
            initial_balance: dec!(3),
            ..PaperExecutorConfig::always_fill()
        });
        let err = executor.submit(&buy(dec!(10))).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InsufficientBalance(_)));
        assert_eq!(executor.orders_filled(), 0);
    }

    #[tokio::test]
    async fn rejects_selling_unheld_shares() {
        let executor = PaperExecutor::new(PaperExecutorConfig::always_fill());
        let sell = OrderRequest::market_sell("down-token", dec!(0.50), dec!(5), dec!(0.03));
        assert!(executor.submit(&sell).await.is_err());
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let executor = PaperExecutor::new(PaperExecutorConfig::default());
        assert!(matches!(
            executor.fill_report("nope").await,
            Err(ExecutionError::NotFound(_))
        ));
    }
}
