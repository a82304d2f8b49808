//! Unauthenticated CLOB price queries with rate limiting.

use anyhow::{anyhow, Result};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::clob::Side;

pub const POLYMARKET_CLOB_URL: &str = "https://clob.polymarket.com";

#[derive(Debug, Deserialize)]
struct MidpointResponse {
    mid: Decimal,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Decimal,
}

/// Public price endpoints of the CLOB.
pub struct PolymarketClient {
    http: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl PolymarketClient {
    /// Rate limited to 300 requests per minute.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limit(nonzero!(300u32))
    }

    #[must_use]
    pub fn with_rate_limit(requests_per_minute: NonZeroU32) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: POLYMARKET_CLOB_URL.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(requests_per_minute))),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Ok(http) = Client::builder().timeout(timeout).build() {
            self.http = http;
        }
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("API error {}: {}", status, text));
        }

        Ok(response.json::<T>().await?)
    }

    /// Midpoint of the best bid and ask for a token.
    pub async fn midpoint(&self, token_id: &str) -> Result<Decimal> {
        let path = format!("/midpoint?token_id={}", urlencoding::encode(token_id));
        let response: MidpointResponse = self.get(&path).await?;
        Ok(response.mid)
    }

    /// Best price available to a taker on `side`.
    pub async fn price(&self, token_id: &str, side: Side) -> Result<Decimal> {
        let path = format!(
            "/price?token_id={}&side={}",
            urlencoding::encode(token_id),
            side.as_str()
        );
        let response: PriceResponse = self.get(&path).await?;
        Ok(response.price)
    }
}

impl Default for PolymarketClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn midpoint_parses_string_decimal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/midpoint"))
            .and(query_param("token_id", "123"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "mid": "0.455" })),
            )
            .mount(&server)
            .await;

        let client = PolymarketClient::new().with_base_url(server.uri());
        assert_eq!(client.midpoint("123").await.unwrap(), dec!(0.455));
    }

    #[tokio::test]
    async fn price_passes_side() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/price"))
            .and(query_param("side", "BUY"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "price": "0.41" })),
            )
            .mount(&server)
            .await;

        let client = PolymarketClient::new().with_base_url(server.uri());
        assert_eq!(client.price("123", Side::Buy).await.unwrap(), dec!(0.41));
    }

    #[tokio::test]
    async fn errors_surface_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/midpoint"))
            .respond_with(ResponseTemplate::new(404).set_body_string("No orderbook exists"))
            .mount(&server)
            .await;

        let client = PolymarketClient::new().with_base_url(server.uri());
        let err = client.midpoint("missing").await.unwrap_err().to_string();
        assert!(err.contains("404"));
    }

    #[test]
    fn base_url_is_trimmed() {
        let client = PolymarketClient::new().with_base_url("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
