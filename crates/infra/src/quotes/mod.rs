//! Latest-quote and quote-history storage.
//!
//! - `upsert` keeps one row per pair and never moves `updated_at` backwards.
//! - `append_history` is unique on `(pair, quoted_at, source)`; re-appending the
//!   same key is a silent no-op, which makes completion retries safe.

pub mod postgres;
pub mod store;

pub use postgres::PostgresQuoteStore;
pub use store::{InMemoryQuoteStore, QuoteStore, QuoteStoreError};
