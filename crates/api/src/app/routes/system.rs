use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse};

use fxrates_infra::FxRatesService;

use crate::app::errors;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(Extension(service): Extension<Arc<FxRatesService>>) -> axum::response::Response {
    match service.ready().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "readiness_check_failed");
            errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "not_ready", e.to_string())
        }
    }
}
