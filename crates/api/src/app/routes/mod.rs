use axum::{
    Router,
    routing::{get, post},
};

pub mod internal;
pub mod quotes;
pub mod system;

/// Router for the public quote endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/quote-updates", post(quotes::submit_quote_update))
        .route("/quote-updates/:id", get(quotes::get_quote_update))
        .route("/quotes", get(quotes::get_last_quote))
}
