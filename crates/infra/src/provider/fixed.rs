use async_trait::async_trait;
use chrono::Utc;

use fxrates_core::{Pair, Quote};

use super::{FetchError, RateProvider};

/// Returns the same price for every pair, stamped with the current time.
#[derive(Debug, Clone, Copy)]
pub struct FixedRateProvider {
    price: f64,
}

impl FixedRateProvider {
    pub fn new(price: f64) -> Self {
        Self { price }
    }
}

#[async_trait]
impl RateProvider for FixedRateProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch(&self, pair: Pair) -> Result<Quote, FetchError> {
        Ok(Quote::new(pair, self.price, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_configured_price() {
        let pair = Pair::parse("USD/MXN").unwrap();
        let quote = FixedRateProvider::new(1.2345).fetch(pair).await.unwrap();
        assert_eq!(quote.pair, pair);
        assert_eq!(quote.price, 1.2345);
    }
}
