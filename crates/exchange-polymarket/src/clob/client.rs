//! Authenticated CLOB trading client.
//!
//! Every trading request carries L2 headers. Responses are classified into
//! rate limits, retryable server errors, rejections and insufficient
//! balance so callers can decide between abandoning and retrying.

use super::auth::{ApiCredentials, ClobAuthError, L1Headers, L2Auth};
use super::execution::{ExecutionError, FillReport, OrderAck, OrderExecutor, OrderStatus};
use super::eip712::Side;
use super::order::{OrderBuilder, OrderError, OrderRequest, OrderType, PostOrderBody, SignedOrder};
use super::wallet::Wallet;
use async_trait::async_trait;
use chrono::Utc;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CLOB_URL: &str = "https://clob.polymarket.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const COLLATERAL_SCALE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
/// Matched prices remembered between submit and the fill poll.
const MATCHED_PRICE_CAPACITY: usize = 512;

#[derive(Debug, Error)]
pub enum ClobError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] ClobAuthError),

    #[error(transparent)]
    Order(#[from] OrderError),
}

impl ClobError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ClobError::Http(_) | ClobError::RateLimited => true,
            ClobError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ClobError> for ExecutionError {
    fn from(e: ClobError) -> Self {
        match e {
            ClobError::RateLimited => ExecutionError::RateLimited,
            ClobError::Api { status, message } => ExecutionError::Api { status, message },
            ClobError::Rejected(msg) => ExecutionError::Rejected(msg),
            ClobError::InsufficientBalance(msg) => ExecutionError::InsufficientBalance(msg),
            ClobError::Http(e) => ExecutionError::Network(e.to_string()),
            ClobError::Order(OrderError::Signing(e)) => ExecutionError::Signing(e.to_string()),
            ClobError::Order(e) => ExecutionError::InvalidOrder(e.to_string()),
            other => ExecutionError::Api {
                status: 0,
                message: other.to_string(),
            },
        }
    }
}

fn is_balance_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not enough balance")
        || lower.contains("insufficient")
        || lower.contains("balance is not enough")
}

/// Maps a non-success HTTP status and body onto the error taxonomy.
fn classify(status: StatusCode, body: &str) -> ClobError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ClobError::RateLimited;
    }
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("errorMsg"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());

    if status.is_server_error() {
        ClobError::Api {
            status: status.as_u16(),
            message,
        }
    } else if is_balance_message(&message) {
        ClobError::InsufficientBalance(message)
    } else {
        ClobError::Rejected(message)
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_msg: String,
    #[serde(rename = "orderID", default)]
    pub order_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub making_amount: Option<String>,
    #[serde(default)]
    pub taking_amount: Option<String>,
}

impl PostOrderResponse {
    /// Average price of the immediate match. A buy makes USDC and takes
    /// shares; a sell the reverse. `None` when nothing matched.
    #[must_use]
    pub fn matched_price(&self, side: Side) -> Option<Decimal> {
        let parse = |raw: &Option<String>| {
            raw.as_deref()
                .and_then(|v| v.trim().parse::<Decimal>().ok())
                .filter(|v| *v > Decimal::ZERO)
        };
        let making = parse(&self.making_amount)?;
        let taking = parse(&self.taking_amount)?;
        let (usdc, shares) = match side {
            Side::Buy => (making, taking),
            Side::Sell => (taking, making),
        };
        Some(usdc / shares)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrderResponse {
    #[serde(default)]
    pub id: String,
    pub status: String,
    pub original_size: Decimal,
    pub size_matched: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
struct BalanceAllowanceResponse {
    balance: Decimal,
}

// =============================================================================
// Client
// =============================================================================

/// Bounded map of order id to matched price, oldest evicted first.
#[derive(Default)]
struct MatchedPrices {
    prices: HashMap<String, Decimal>,
    order: VecDeque<String>,
}

impl MatchedPrices {
    fn insert(&mut self, order_id: &str, price: Decimal) {
        if self.prices.insert(order_id.to_string(), price).is_none() {
            self.order.push_back(order_id.to_string());
        }
        while self.order.len() > MATCHED_PRICE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.prices.remove(&oldest);
            }
        }
    }

    fn get(&self, order_id: &str) -> Option<Decimal> {
        self.prices.get(order_id).copied()
    }
}

pub struct ClobClient {
    http: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    auth: L2Auth,
    builder: OrderBuilder,
    matched: Mutex<MatchedPrices>,
}

impl ClobClient {
    pub fn new(builder: OrderBuilder, credentials: ApiCredentials) -> Result<Self, ClobError> {
        let auth = L2Auth::new(credentials, builder.wallet().address().to_string())?;
        Ok(Self {
            http: Client::builder().timeout(DEFAULT_TIMEOUT).build()?,
            base_url: CLOB_URL.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(nonzero!(300u32)))),
            auth,
            builder,
            matched: Mutex::new(MatchedPrices::default()),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ClobError> {
        self.http = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        let quota = NonZeroU32::new(requests_per_minute).unwrap_or(nonzero!(300u32));
        self.rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(quota)));
        self
    }

    /// Exchanges an L1 signature for API credentials: derive first, create
    /// on failure.
    pub async fn derive_api_key(
        http: &Client,
        base_url: &str,
        wallet: &Wallet,
    ) -> Result<ApiCredentials, ClobError> {
        let base_url = base_url.trim_end_matches('/');
        let headers = L1Headers::sign(wallet, Utc::now().timestamp(), 0)?;

        let derived = headers
            .apply(http.get(format!("{base_url}/auth/derive-api-key")))
            .send()
            .await?;
        if derived.status().is_success() {
            return derived
                .json::<ApiCredentials>()
                .await
                .map_err(|e| ClobError::Parse(e.to_string()));
        }
        debug!(status = %derived.status(), "derive-api-key failed, creating a new key");

        let created = headers
            .apply(http.post(format!("{base_url}/auth/api-key")))
            .send()
            .await?;
        let status = created.status();
        if !status.is_success() {
            let body = created.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }
        created
            .json::<ApiCredentials>()
            .await
            .map_err(|e| ClobError::Parse(e.to_string()))
    }

    /// Sends an L2-authenticated request. `path` is signed without its query.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<String>,
    ) -> Result<String, ClobError> {
        self.rate_limiter.until_ready().await;

        let body = body.unwrap_or_default();
        let headers = self
            .auth
            .headers(Utc::now().timestamp(), method.as_str(), path, &body)?;

        let url = match query {
            Some(q) => format!("{}{}?{}", self.base_url, path, q),
            None => format!("{}{}", self.base_url, path),
        };
        let mut request = headers.apply(self.http.request(method, &url));
        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(classify(status, &text));
        }
        Ok(text)
    }

    pub async fn post_order(
        &self,
        order: &SignedOrder,
        order_type: OrderType,
    ) -> Result<PostOrderResponse, ClobError> {
        let body = PostOrderBody {
            order: order.payload(),
            owner: self.auth.api_key().to_string(),
            order_type,
        };
        let json = serde_json::to_string(&body).map_err(|e| ClobError::Parse(e.to_string()))?;
        let text = self.send(Method::POST, "/order", None, Some(json)).await?;

        let response: PostOrderResponse =
            serde_json::from_str(&text).map_err(|e| ClobError::Parse(e.to_string()))?;
        if !response.success || !response.error_msg.is_empty() {
            let message = if response.error_msg.is_empty() {
                "order not accepted".to_string()
            } else {
                response.error_msg.clone()
            };
            return Err(if is_balance_message(&message) {
                ClobError::InsufficientBalance(message)
            } else {
                ClobError::Rejected(message)
            });
        }
        if response.order_id.is_empty() {
            return Err(ClobError::Parse("accepted order without an id".to_string()));
        }
        Ok(response)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<OpenOrderResponse, ClobError> {
        let path = format!("/data/order/{order_id}");
        let text = self.send(Method::GET, &path, None, None).await?;
        serde_json::from_str(&text).map_err(|e| ClobError::Parse(e.to_string()))
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<(), ClobError> {
        let body = serde_json::json!({ "orderID": order_id }).to_string();
        self.send(Method::DELETE, "/order", None, Some(body)).await?;
        Ok(())
    }

    /// Collateral balance in USDC.
    pub async fn collateral_balance(&self) -> Result<Decimal, ClobError> {
        let text = self
            .send(
                Method::GET,
                "/balance-allowance",
                Some("asset_type=COLLATERAL&signature_type=0"),
                None,
            )
            .await?;
        let parsed: BalanceAllowanceResponse =
            serde_json::from_str(&text).map_err(|e| ClobError::Parse(e.to_string()))?;
        Ok(parsed.balance / COLLATERAL_SCALE)
    }
}

#[async_trait]
impl OrderExecutor for ClobClient {
    fn name(&self) -> &str {
        "clob"
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderAck, ExecutionError> {
        let signed = self
            .builder
            .build_signed(request)
            .map_err(ClobError::from)?;
        let response = self.post_order(&signed, request.order_type).await?;
        let matched_price = response.matched_price(request.side);
        if let Some(price) = matched_price {
            self.matched.lock().insert(&response.order_id, price);
        }
        info!(
            order_id = %response.order_id,
            side = %request.side,
            price = %request.price,
            matched_price = ?matched_price,
            size = %request.size,
            status = %response.status,
            "order accepted"
        );
        Ok(OrderAck {
            order_id: response.order_id,
            status: OrderStatus::from_wire(&response.status),
        })
    }

    async fn fill_report(&self, order_id: &str) -> Result<FillReport, ExecutionError> {
        let order = self.get_order(order_id).await?;
        let avg_price = self
            .matched
            .lock()
            .get(order_id)
            .or(order.price)
            .unwrap_or(Decimal::ZERO);
        Ok(FillReport {
            order_id: if order.id.is_empty() {
                order_id.to_string()
            } else {
                order.id
            },
            status: OrderStatus::from_wire(&order.status),
            original_size: order.original_size,
            filled_size: order.size_matched,
            avg_price,
        })
    }

    async fn cancel(&self, order_id: &str) -> Result<(), ExecutionError> {
        if let Err(e) = self.cancel_order(order_id).await {
            warn!(order_id, error = %e, "cancel failed");
            return Err(e.into());
        }
        Ok(())
    }

    async fn balance(&self) -> Result<Decimal, ExecutionError> {
        Ok(self.collateral_balance().await?)
    }
}
