//! HTTP API application wiring (Axum router).
//!
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: JSON error envelope and service error mapping

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use fxrates_infra::FxRatesService;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Full public router: quote updates, quotes, probes, and the internal fetch endpoint.
pub fn build_app(service: Arc<FxRatesService>) -> Router {
    Router::new()
        .route("/healthz", get(routes::system::health))
        .route("/readyz", get(routes::system::ready))
        .merge(routes::router())
        .nest("/internal", routes::internal::router())
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_id))
                .layer(Extension(service)),
        )
}

/// Probes and the internal fetch endpoint only, for processes that do not take intake.
pub fn build_rate_server(service: Arc<FxRatesService>) -> Router {
    Router::new()
        .route("/healthz", get(routes::system::health))
        .route("/readyz", get(routes::system::ready))
        .nest("/internal", routes::internal::router())
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_id))
                .layer(Extension(service)),
        )
}
