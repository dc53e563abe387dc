//! Quotes and quote history.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::QuoteUpdateId;
use crate::pair::Pair;

/// Latest known price for a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub pair: Pair,
    pub price: f64,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(pair: Pair, price: f64, updated_at: DateTime<Utc>) -> Self {
        Self {
            pair,
            price,
            updated_at,
        }
    }
}

/// The fetching path that produced a quote.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Poller,
    Channel,
    Delegate,
}

impl QuoteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteSource::Poller => "poller",
            QuoteSource::Channel => "channel",
            QuoteSource::Delegate => "delegate",
        }
    }
}

impl core::fmt::Display for QuoteSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poller" => Ok(QuoteSource::Poller),
            "channel" => Ok(QuoteSource::Channel),
            "delegate" => Ok(QuoteSource::Delegate),
            other => Err(DomainError::validation(format!("unknown quote source: {other}"))),
        }
    }
}

/// Append-only audit record of a fetched price.
///
/// Uniqueness key is `(pair, quoted_at, source)`: appending the same fetch
/// twice is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteHistory {
    pub pair: Pair,
    pub price: f64,
    pub quoted_at: DateTime<Utc>,
    pub source: QuoteSource,
    pub update_id: Option<QuoteUpdateId>,
}

impl QuoteHistory {
    pub fn from_quote(quote: &Quote, source: QuoteSource, update_id: Option<QuoteUpdateId>) -> Self {
        Self {
            pair: quote.pair,
            price: quote.price,
            quoted_at: quote.updated_at,
            source,
            update_id,
        }
    }

    pub fn key(&self) -> (Pair, DateTime<Utc>, QuoteSource) {
        (self.pair, self.quoted_at, self.source)
    }
}
