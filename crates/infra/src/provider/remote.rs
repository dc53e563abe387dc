//! Client for another process's `/internal/rates/fetch` endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use fxrates_core::{Pair, Quote};

use super::http::{HttpError, get_json};
use super::{FetchError, RateProvider};
use crate::retry::RetryPolicy;

pub const FETCH_PATH: &str = "/internal/rates/fetch";

/// Wire shape of a fetched rate, shared by the endpoint and this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedRate {
    pub pair: Pair,
    pub price: f64,
    pub updated_at: DateTime<Utc>,
}

impl From<Quote> for FetchedRate {
    fn from(quote: Quote) -> Self {
        Self {
            pair: quote.pair,
            price: quote.price,
            updated_at: quote.updated_at,
        }
    }
}

impl From<FetchedRate> for Quote {
    fn from(rate: FetchedRate) -> Self {
        Quote::new(rate.pair, rate.price, rate.updated_at)
    }
}

#[derive(Debug, Clone)]
pub struct RemoteRateProvider {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl RemoteRateProvider {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, retry)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }
}

#[async_trait]
impl RateProvider for RemoteRateProvider {
    fn name(&self) -> &str {
        "remote"
    }

    #[instrument(skip(self, pair), fields(pair = %pair, target = %self.base_url), err)]
    async fn fetch(&self, pair: Pair) -> Result<Quote, FetchError> {
        let url = format!("{}{}", self.base_url, FETCH_PATH);
        let pair_text = pair.to_string();

        let rate: FetchedRate = get_json(&self.client, &url, &[("pair", pair_text.as_str())], &self.retry)
            .await
            .map_err(|e| match e {
                HttpError::Status { status: 400, .. } => FetchError::UnsupportedPair(pair_text.clone()),
                other => FetchError::Provider(format!("remote fetch: {other}")),
            })?;

        if rate.pair != pair {
            return Err(FetchError::Provider(format!(
                "remote fetch: asked for {pair}, got {}",
                rate.pair
            )));
        }
        Ok(rate.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> RemoteRateProvider {
        RemoteRateProvider::new(server.uri(), RetryPolicy::fixed(2, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn decodes_fetched_rate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FETCH_PATH))
            .and(query_param("pair", "EUR/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"pair":"EUR/USD","price":1.2345,"updated_at":"2024-01-02T03:04:05Z"}"#,
            ))
            .mount(&server)
            .await;

        let quote = provider(&server).fetch(Pair::parse("EUR/USD").unwrap()).await.unwrap();
        assert_eq!(quote.price, 1.2345);
        assert_eq!(quote.updated_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[tokio::test]
    async fn bad_request_means_unsupported_pair() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FETCH_PATH))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let err = provider(&server).fetch(Pair::parse("USD/MXN").unwrap()).await.unwrap_err();
        assert_eq!(err, FetchError::UnsupportedPair("USD/MXN".to_string()));
    }

    #[tokio::test]
    async fn upstream_failure_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FETCH_PATH))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        let err = provider(&server).fetch(Pair::parse("EUR/MXN").unwrap()).await.unwrap_err();
        assert!(matches!(err, FetchError::Provider(_)));
    }

    #[tokio::test]
    async fn mismatched_pair_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FETCH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"pair":"USD/EUR","price":0.9,"updated_at":"2024-01-02T03:04:05Z"}"#,
            ))
            .mount(&server)
            .await;

        let err = provider(&server).fetch(Pair::parse("EUR/USD").unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("asked for EUR/USD"));
    }
}
