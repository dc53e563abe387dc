//! Infrastructure layer: stores, idempotency, rate providers, orchestration, workers.

pub mod completion;
pub mod config;
pub mod db;
pub mod idempotency;
pub mod jobs;
pub mod provider;
pub mod quotes;
pub mod retry;
pub mod service;
pub mod workers;


pub use service::{FxRatesService, ServiceError, ServiceResult};
