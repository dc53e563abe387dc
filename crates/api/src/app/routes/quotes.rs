use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use fxrates_infra::FxRatesService;

use crate::app::{dto, errors};

pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

pub async fn submit_quote_update(
    Extension(service): Extension<Arc<FxRatesService>>,
    headers: HeaderMap,
    body: Result<Json<dto::SubmitQuoteUpdateRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "bad_request", e.body_text()),
    };

    let key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match service.request_quote_update(&body.pair, key).await {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(dto::SubmitQuoteUpdateResponse {
                update_id: id.to_string(),
            }),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_quote_update(
    Extension(service): Extension<Arc<FxRatesService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match service.get_quote_update(&id).await {
        Ok(job) => (StatusCode::OK, Json(dto::QuoteUpdateResponse::from(job))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_last_quote(
    Extension(service): Extension<Arc<FxRatesService>>,
    query: Result<Query<dto::PairQuery>, QueryRejection>,
) -> axum::response::Response {
    let Ok(Query(query)) = query else {
        return errors::json_error(StatusCode::BAD_REQUEST, "bad_request", "invalid query string");
    };

    match service.get_last_quote(&query.pair).await {
        Ok(quote) => (StatusCode::OK, Json(dto::QuoteResponse::from(quote))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
