use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use fxrates_infra::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, "bad_request", msg),
        ServiceError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ServiceError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        ServiceError::Unavailable(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
        ServiceError::Provider(msg) => json_error(StatusCode::BAD_GATEWAY, "provider_error", msg),
        ServiceError::Store(msg) => {
            tracing::error!(error = %msg, "store_error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
