//! Gamma API client for up/down window discovery and resolution lookup.
//!
//! Windows are addressed by their time-aligned slug, so the client never
//! needs to search: the slug for any asset and start time is computable.

use crate::models::{window_slug, window_start, GammaEvent, MarketWindow};
use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use reqwest::Client;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use updown_core::{Asset, Outcome};

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

#[derive(Debug, Error)]
pub enum GammaError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gamma API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("no event found for slug {0}")]
    NotFound(String),

    #[error("event {slug} has no tradeable market")]
    InvalidMarket { slug: String },
}

pub struct GammaClient {
    http: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl GammaClient {
    /// Client with a 5 s timeout, limited to 60 requests per minute.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limit(nonzero!(60u32))
    }

    #[must_use]
    pub fn with_rate_limit(requests_per_minute: NonZeroU32) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: GAMMA_API_URL.to_string(),
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

    async fn fetch_event(&self, slug: &str) -> Result<GammaEvent, GammaError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/events", self.base_url);
        debug!(%slug, "GET /events");
        let response = self
            .http
            .get(&url)
            .query(&[("slug", slug)])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GammaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let events: Vec<GammaEvent> = response.json().await?;
        events
            .into_iter()
            .next()
            .ok_or_else(|| GammaError::NotFound(slug.to_string()))
    }

    /// The window for `asset` starting at `start` (unix seconds).
    pub async fn fetch_window(&self, asset: Asset, start: i64) -> Result<MarketWindow, GammaError> {
        let slug = window_slug(asset, start);
        let event = self.fetch_event(&slug).await?;
        MarketWindow::from_event(asset, start, &event).ok_or(GammaError::InvalidMarket { slug })
    }

    /// The window containing `now`.
    pub async fn current_window(
        &self,
        asset: Asset,
        now: DateTime<Utc>,
    ) -> Result<MarketWindow, GammaError> {
        self.fetch_window(asset, window_start(now)).await
    }

    /// Current windows for every asset, fetched concurrently. Failures are
    /// logged and skipped so one asset never blocks the others.
    pub async fn discover(&self, assets: &[Asset], now: DateTime<Utc>) -> Vec<MarketWindow> {
        let lookups = assets.iter().map(|asset| async move {
            match self.current_window(*asset, now).await {
                Ok(window) => {
                    debug!(
                        window = %window.id,
                        up = ?window.up_price,
                        down = ?window.down_price,
                        "discovered window"
                    );
                    Some(window)
                }
                Err(e) => {
                    warn!(asset = %asset, error = %e, "window discovery failed");
                    None
                }
            }
        });

        futures_util::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Confirmed winner of a window, or `None` while unresolved.
    pub async fn resolution(&self, window_id: &str) -> Result<Option<Outcome>, GammaError> {
        let event = self.fetch_event(window_id).await?;
        let winner = event.markets.iter().find_map(|m| m.resolved_winner());
        if let Some(outcome) = winner {
            info!(window = %window_id, winner = %outcome, "window resolved");
        }
        Ok(winner)
    }
}

impl Default for GammaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event_body(slug: &str, prices: &str) -> serde_json::Value {
        serde_json::json!([{
            "slug": slug,
            "title": "Up or Down",
            "markets": [{
                "conditionId": "0xcond",
                "outcomePrices": prices,
                "clobTokenIds": "[\"up-token\", \"down-token\"]",
                "endDate": "2026-01-31T12:15:00Z",
                "eventStartTime": "2026-01-31T12:00:00Z",
                "active": true
            }]
        }])
    }

    #[tokio::test]
    async fn fetches_window_by_slug() {
        let server = MockServer::start().await;
        let now = Utc.with_ymd_and_hms(2026, 1, 31, 12, 5, 0).unwrap();
        let slug = window_slug(Asset::Btc, window_start(now));

        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("slug", slug.as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(event_body(&slug, "[\"0.53\", \"0.47\"]")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = GammaClient::new().with_base_url(server.uri());
        let window = client.current_window(Asset::Btc, now).await.unwrap();

        assert_eq!(window.id, slug);
        assert_eq!(window.up_token_id, "up-token");
        assert_eq!(window.up_price, Some(dec!(0.53)));
        assert_eq!(window.seconds_remaining(now), 600);
    }

    #[tokio::test]
    async fn empty_event_list_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = GammaClient::new().with_base_url(server.uri());
        let err = client.fetch_window(Asset::Eth, 900).await.unwrap_err();
        assert!(matches!(err, GammaError::NotFound(ref s) if s == "eth-updown-15m-900"));
    }

    #[tokio::test]
    async fn discover_skips_failing_assets() {
        let server = MockServer::start().await;
        let now = Utc.with_ymd_and_hms(2026, 1, 31, 12, 5, 0).unwrap();
        let btc = window_slug(Asset::Btc, window_start(now));

        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("slug", btc.as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(event_body(&btc, "[\"0.5\", \"0.5\"]")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = GammaClient::new().with_base_url(server.uri());
        let windows = client.discover(&[Asset::Btc, Asset::Sol], now).await;
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].asset, Asset::Btc);
    }

    #[tokio::test]
    async fn resolution_reads_final_prices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("slug", "sol-updown-15m-900"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(event_body("sol-updown-15m-900", "[\"0\", \"1\"]")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("slug", "sol-updown-15m-1800"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(event_body("sol-updown-15m-1800", "[\"0.97\", \"0.03\"]")),
            )
            .mount(&server)
            .await;

        let client = GammaClient::new().with_base_url(server.uri());
        assert_eq!(
            client.resolution("sol-updown-15m-900").await.unwrap(),
            Some(Outcome::Down)
        );
        assert_eq!(client.resolution("sol-updown-15m-1800").await.unwrap(), None);
    }

    #[tokio::test]
    async fn api_errors_carry_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = GammaClient::new().with_base_url(server.uri());
        let err = client.fetch_window(Asset::Btc, 0).await.unwrap_err();
        assert!(matches!(err, GammaError::Api { status: 503, .. }));
    }
}
