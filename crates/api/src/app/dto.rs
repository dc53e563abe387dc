use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fxrates_core::{Quote, QuoteUpdate};

// -------------------------
// Request DTOs
// -------------------------

/// `pair` stays a string here so malformed values get the service's 400.
#[derive(Debug, Deserialize)]
pub struct SubmitQuoteUpdateRequest {
    pub pair: String,
}

#[derive(Debug, Deserialize)]
pub struct PairQuery {
    #[serde(default)]
    pub pair: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitQuoteUpdateResponse {
    pub update_id: String,
}

#[derive(Debug, Serialize)]
pub struct QuoteUpdateResponse {
    pub update_id: String,
    pub pair: String,
    pub status: &'static str,
    pub price: Option<f64>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl From<QuoteUpdate> for QuoteUpdateResponse {
    fn from(job: QuoteUpdate) -> Self {
        Self {
            updated_at: job.updated_at(),
            update_id: job.id.to_string(),
            pair: job.pair.to_string(),
            status: job.status.as_str(),
            price: job.price,
            error: job.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub pair: String,
    pub price: f64,
    pub updated_at: DateTime<Utc>,
}

impl From<Quote> for QuoteResponse {
    fn from(quote: Quote) -> Self {
        Self {
            pair: quote.pair.to_string(),
            price: quote.price,
            updated_at: quote.updated_at,
        }
    }
}
