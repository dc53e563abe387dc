//! Quote-update job storage.
//!
//! ## Claim semantics
//!
//! - `claim_queued(limit)` moves up to `limit` of the oldest `queued` jobs to
//!   `processing` in one atomic step. Concurrent callers get disjoint batches.
//! - `claim(id)` does the same for a single job; it returns `false` when the job
//!   is no longer `queued` (someone else got it).
//! - `fail_stale(lease, now)` fails `processing` jobs claimed longer than `lease`
//!   ago. Stale jobs are never re-queued, so status stays monotonic.
//!
//! ## Components
//!
//! - `JobStore`: async storage abstraction
//! - `InMemoryJobStore`: single `RwLock` over the table (tests/dev)
//! - `PostgresJobStore`: `FOR UPDATE SKIP LOCKED` claim

pub mod postgres;
pub mod store;

pub use postgres::PostgresJobStore;
pub use store::{ClaimedJob, IdGenerator, InMemoryJobStore, JobStore, JobStoreError};
