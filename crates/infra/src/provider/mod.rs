//! Rate providers: where a fresh quote for a pair comes from.
//!
//! - `FixedRateProvider`: constant price, stamped with the current time
//! - `ExchangeRatesApiProvider`: exchangeratesapi.io `latest` endpoint
//! - `RemoteRateProvider`: another fxrates process's fetch endpoint

pub mod exchangeratesapi;
pub mod fixed;
mod http;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fxrates_core::{Pair, Quote};

pub use exchangeratesapi::ExchangeRatesApiProvider;
pub use fixed::FixedRateProvider;
pub use remote::{FetchedRate, RemoteRateProvider};

/// Why a fetch produced no quote.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("unsupported pair: {0}")]
    UnsupportedPair(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of current quotes.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Fetch the current quote for `pair`.
    async fn fetch(&self, pair: Pair) -> Result<Quote, FetchError>;
}

#[async_trait]
impl<T: RateProvider + ?Sized> RateProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch(&self, pair: Pair) -> Result<Quote, FetchError> {
        (**self).fetch(pair).await
    }
}
