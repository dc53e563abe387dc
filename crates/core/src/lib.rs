//! `fxrates-core`: domain types for FX quote refresh jobs.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod pair;
pub mod quote;
pub mod update;

pub use error::{DomainError, DomainResult};
pub use id::QuoteUpdateId;
pub use pair::{Currency, Pair};
pub use quote::{Quote, QuoteHistory, QuoteSource};
pub use update::{QuoteUpdate, QuoteUpdateStatus, StatusChange};
