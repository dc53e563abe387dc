//! exchangeratesapi.io provider.
//!
//! The free tier only quotes against the account base currency (EUR), so
//! other pairs are derived as cross rates:
//!
//! | pair            | price                     |
//! |-----------------|---------------------------|
//! | `BASE/x`        | `rate[x]`                 |
//! | `x/BASE`        | `1 / rate[x]`             |
//! | `x/y`           | `rate[y] / rate[x]`       |

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use fxrates_core::{Currency, Pair, Quote};

use super::http::{HttpError, get_json};
use super::{FetchError, RateProvider};
use crate::retry::RetryPolicy;

const LATEST_PATH: &str = "/v1/latest";

pub struct ExchangeRatesApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl ExchangeRatesApiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, retry: RetryPolicy) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key, retry)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry,
        }
    }

    fn symbols() -> String {
        Currency::ALL
            .iter()
            .map(Currency::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl core::fmt::Debug for ExchangeRatesApiProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExchangeRatesApiProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    base: String,
    #[serde(default)]
    rates: HashMap<String, f64>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    #[serde(default)]
    info: String,
}

fn provider_error(msg: impl core::fmt::Display) -> FetchError {
    FetchError::Provider(format!("exchangeratesapi: {msg}"))
}

/// Derive `pair`'s price from a base-currency rate table.
fn cross_rate(body: &LatestResponse, pair: Pair) -> Result<f64, FetchError> {
    let base = pair.base().as_str();
    let quote = pair.quote().as_str();

    let rate_from_base = |currency: &str| -> Result<f64, FetchError> {
        if currency == body.base {
            return Ok(1.0);
        }
        body.rates
            .get(currency)
            .copied()
            .ok_or_else(|| provider_error(format!("missing rate for {currency}")))
    };

    let to_base = rate_from_base(base)?;
    let to_quote = rate_from_base(quote)?;

    if base == body.base {
        return Ok(to_quote);
    }
    if to_base == 0.0 {
        return Err(provider_error("zero rate for base currency"));
    }
    if quote == body.base {
        Ok(1.0 / to_base)
    } else {
        Ok(to_quote / to_base)
    }
}

fn quoted_at(timestamp: i64) -> DateTime<Utc> {
    if timestamp > 0 {
        if let Some(at) = Utc.timestamp_opt(timestamp, 0).single() {
            return at;
        }
    }
    Utc::now()
}

#[async_trait]
impl RateProvider for ExchangeRatesApiProvider {
    fn name(&self) -> &str {
        "exchangeratesapi"
    }

    #[instrument(skip(self, pair), fields(pair = %pair), err)]
    async fn fetch(&self, pair: Pair) -> Result<Quote, FetchError> {
        let url = format!("{}{}", self.base_url, LATEST_PATH);
        let symbols = Self::symbols();
        let query = [("access_key", self.api_key.as_str()), ("symbols", symbols.as_str())];

        let body: LatestResponse = get_json(&self.client, &url, &query, &self.retry)
            .await
            .map_err(|e| match e {
                HttpError::Status { status, .. } => provider_error(format!("status {status}")),
                other => provider_error(other),
            })?;

        if !body.success {
            return Err(match &body.error {
                Some(err) => provider_error(format!("{} {}", err.code, err.info)),
                None => provider_error("unsuccessful response"),
            });
        }

        let price = cross_rate(&body, pair)?;
        debug!(price, base = %body.base, "rate derived");
        Ok(Quote::new(pair, price, quoted_at(body.timestamp)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HAPPY_BODY: &str = r#"{
        "success": true,
        "timestamp": 1700000000,
        "base": "EUR",
        "date": "2023-11-14",
        "rates": { "USD": 1.10, "EUR": 1.0, "MXN": 19.25 }
    }"#;

    fn provider(server: &MockServer) -> ExchangeRatesApiProvider {
        ExchangeRatesApiProvider::new(
            server.uri(),
            "test-key",
            RetryPolicy::fixed(3, Duration::from_millis(1)),
        )
    }

    async fn happy_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .and(query_param("access_key", "test-key"))
            .and(query_param("symbols", "USD,EUR,MXN"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HAPPY_BODY))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn base_currency_pair_uses_rate_directly() {
        let server = happy_server().await;
        let quote = provider(&server).fetch(Pair::parse("EUR/USD").unwrap()).await.unwrap();
        assert!((quote.price - 1.10).abs() < 1e-12);
        assert_eq!(quote.updated_at.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn quote_in_base_currency_is_inverted() {
        let server = happy_server().await;
        let quote = provider(&server).fetch(Pair::parse("USD/EUR").unwrap()).await.unwrap();
        assert!((quote.price - 1.0 / 1.10).abs() < 1e-12);
    }

    #[tokio::test]
    async fn other_pairs_are_cross_rates() {
        let server = happy_server().await;
        let quote = provider(&server).fetch(Pair::parse("USD/MXN").unwrap()).await.unwrap();
        assert!((quote.price - 19.25 / 1.10).abs() < 1e-12);
    }

    #[tokio::test]
    async fn unsuccessful_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"success": false, "error": {"code": 101, "info": "invalid access key"}}"#,
            ))
            .mount(&server)
            .await;

        let err = provider(&server).fetch(Pair::parse("EUR/USD").unwrap()).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Provider("exchangeratesapi: 101 invalid access key".to_string())
        );
    }

    #[tokio::test]
    async fn missing_rate_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"success": true, "timestamp": 1700000000, "base": "EUR", "rates": {"USD": 1.1}}"#,
            ))
            .mount(&server)
            .await;

        let err = provider(&server).fetch(Pair::parse("USD/MXN").unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("missing rate for MXN"));
    }

    #[tokio::test]
    async fn zero_base_rate_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"success": true, "base": "EUR", "rates": {"USD": 0.0, "MXN": 19.0}}"#,
            ))
            .mount(&server)
            .await;

        let err = provider(&server).fetch(Pair::parse("USD/MXN").unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("zero rate"));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HAPPY_BODY))
            .mount(&server)
            .await;

        let quote = provider(&server).fetch(Pair::parse("EUR/MXN").unwrap()).await.unwrap();
        assert!((quote.price - 19.25).abs() < 1e-12);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).fetch(Pair::parse("EUR/USD").unwrap()).await.unwrap_err();
        assert_eq!(err, FetchError::Provider("exchangeratesapi: status 401".to_string()));
    }
}
