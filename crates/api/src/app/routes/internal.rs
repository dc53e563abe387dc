use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query, rejection::QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use fxrates_infra::FxRatesService;
use fxrates_infra::provider::FetchedRate;

use crate::app::{dto, errors};

/// Mounted under `/internal`; served to delegate workers.
pub fn router() -> Router {
    Router::new().route("/rates/fetch", get(fetch_rate))
}

pub async fn fetch_rate(
    Extension(service): Extension<Arc<FxRatesService>>,
    query: Result<Query<dto::PairQuery>, QueryRejection>,
) -> axum::response::Response {
    let Ok(Query(query)) = query else {
        return errors::json_error(StatusCode::BAD_REQUEST, "bad_request", "invalid query string");
    };

    match service.fetch_quote(&query.pair).await {
        Ok(quote) => (StatusCode::OK, Json(FetchedRate::from(quote))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
