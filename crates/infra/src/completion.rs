//! Persisting a fetched quote and finalizing its job.
//!
//! A completion writes three things: a history row, the latest quote, and the
//! job's `done` status. Two units implement it:
//!
//! - `PostgresCompletionUnit`: one transaction, all or nothing.
//! - `OrderedCompletionUnit`: for stores without transactions. Writes go
//!   history -> quote -> status and each step is idempotent, so re-running a
//!   partially applied completion converges. A reader may observe the new quote
//!   before the job is `done`, never `done` without the quote.
//!
//! The ordered unit refuses jobs that are already `failed` before writing. A
//! lease sweep that lands between that check and the status write still leaves
//! the history row and quote in place; the job stays `failed` and the unit
//! returns `InvalidTransition` after logging `completion_lost_to_sweep`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};

use fxrates_core::{Quote, QuoteHistory, QuoteSource, QuoteUpdateId, QuoteUpdateStatus, StatusChange};

use crate::db::describe_sqlx_error;
use crate::jobs::postgres::apply_status;
use crate::jobs::{JobStore, JobStoreError};
use crate::quotes::postgres::{insert_history, upsert_quote};
use crate::quotes::{QuoteStore, QuoteStoreError};

/// A fetched quote ready to be persisted for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub update_id: QuoteUpdateId,
    pub source: QuoteSource,
    pub quote: Quote,
}

impl Completion {
    fn history(&self) -> QuoteHistory {
        QuoteHistory::from_quote(&self.quote, self.source, Some(self.update_id.clone()))
    }

    fn done(&self) -> StatusChange {
        StatusChange::Done {
            price: self.quote.price,
            at: self.quote.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    #[error(transparent)]
    Jobs(#[from] JobStoreError),
    #[error(transparent)]
    Quotes(#[from] QuoteStoreError),
}

impl CompletionError {
    /// Storage hiccups are worth retrying; lifecycle violations are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CompletionError::Jobs(JobStoreError::Storage(_)) | CompletionError::Quotes(QuoteStoreError::Storage(_))
        )
    }
}

/// A job that is already `done` means an earlier attempt landed.
fn already_done(err: &JobStoreError) -> bool {
    matches!(
        err,
        JobStoreError::InvalidTransition {
            from: QuoteUpdateStatus::Done,
            ..
        }
    )
}

#[async_trait]
pub trait CompletionUnit: Send + Sync {
    async fn apply(&self, completion: &Completion) -> Result<(), CompletionError>;
}

#[async_trait]
impl<T: CompletionUnit + ?Sized> CompletionUnit for Arc<T> {
    async fn apply(&self, completion: &Completion) -> Result<(), CompletionError> {
        (**self).apply(completion).await
    }
}

/// Ordered, idempotent writes over independent stores.
#[derive(Clone)]
pub struct OrderedCompletionUnit {
    jobs: Arc<dyn JobStore>,
    quotes: Arc<dyn QuoteStore>,
}

impl OrderedCompletionUnit {
    pub fn new(jobs: Arc<dyn JobStore>, quotes: Arc<dyn QuoteStore>) -> Self {
        Self { jobs, quotes }
    }
}

#[async_trait]
impl CompletionUnit for OrderedCompletionUnit {
    #[instrument(
        skip(self, completion),
        fields(update_id = %completion.update_id, pair = %completion.quote.pair, source = %completion.source),
        err
    )]
    async fn apply(&self, completion: &Completion) -> Result<(), CompletionError> {
        // Without a transaction to roll back, refuse up front for jobs that can never be done.
        let id = &completion.update_id;
        match self.jobs.get(id).await? {
            None => return Err(JobStoreError::NotFound(id.clone()).into()),
            Some(job) if job.status == QuoteUpdateStatus::Failed => {
                return Err(JobStoreError::InvalidTransition {
                    id: id.clone(),
                    from: job.status,
                    to: QuoteUpdateStatus::Done,
                }
                .into());
            }
            Some(_) => {}
        }

        let inserted = self.quotes.append_history(&completion.history()).await?;
        if !inserted {
            debug!("history row already present");
        }
        self.quotes.upsert(&completion.quote).await?;

        match self.jobs.update_status(&completion.update_id, completion.done()).await {
            Err(err) if already_done(&err) => Ok(()),
            Err(
                err @ JobStoreError::InvalidTransition {
                    from: QuoteUpdateStatus::Failed,
                    ..
                },
            ) => {
                warn!(error = %err, "completion_lost_to_sweep");
                Err(err.into())
            }
            other => other.map_err(CompletionError::from),
        }
    }
}

/// Single-transaction completion for Postgres.
#[derive(Debug, Clone)]
pub struct PostgresCompletionUnit {
    pool: PgPool,
}

impl PostgresCompletionUnit {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn tx_error(operation: &str, err: sqlx::Error) -> CompletionError {
    CompletionError::Jobs(JobStoreError::Storage(describe_sqlx_error(operation, &err)))
}

#[async_trait]
impl CompletionUnit for PostgresCompletionUnit {
    #[instrument(
        skip(self, completion),
        fields(update_id = %completion.update_id, pair = %completion.quote.pair, source = %completion.source),
        err
    )]
    async fn apply(&self, completion: &Completion) -> Result<(), CompletionError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| tx_error("begin_transaction", e))?;

        insert_history(&mut tx, &completion.history()).await?;
        upsert_quote(&mut tx, &completion.quote).await?;

        match apply_status(&mut tx, &completion.update_id, completion.done()).await {
            Ok(()) => {}
            Err(err) if already_done(&err) => {
                tx.rollback().await.map_err(|e| tx_error("rollback", e))?;
                return Ok(());
            }
            Err(err) => {
                tx.rollback().await.map_err(|e| tx_error("rollback", e))?;
                return Err(err.into());
            }
        }

        tx.commit()
            .await
            .map_err(|e| tx_error("commit_transaction", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::InMemoryJobStore;
    use crate::quotes::InMemoryQuoteStore;
    use chrono::Utc;
    use fxrates_core::Pair;

    async fn setup() -> (Arc<InMemoryJobStore>, Arc<InMemoryQuoteStore>, OrderedCompletionUnit, QuoteUpdateId) {
        let jobs = InMemoryJobStore::arc();
        let quotes = InMemoryQuoteStore::arc();
        let unit = OrderedCompletionUnit::new(jobs.clone(), quotes.clone());
        let id = jobs.create_queued(Pair::parse("EUR/USD").unwrap()).await.unwrap();
        jobs.claim(&id).await.unwrap();
        (jobs, quotes, unit, id)
    }

    fn completion(id: &QuoteUpdateId) -> Completion {
        Completion {
            update_id: id.clone(),
            source: QuoteSource::Poller,
            quote: Quote::new(Pair::parse("EUR/USD").unwrap(), 1.2345, Utc::now()),
        }
    }

    #[tokio::test]
    async fn ordered_unit_writes_history_quote_and_status() {
        let (jobs, quotes, unit, id) = setup().await;
        let c = completion(&id);

        unit.apply(&c).await.unwrap();

        let job = jobs.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, QuoteUpdateStatus::Done);
        assert_eq!(job.price, Some(1.2345));
        assert_eq!(job.updated_at(), c.quote.updated_at);
        assert_eq!(quotes.get_last(c.quote.pair).await.unwrap(), Some(c.quote.clone()));
        assert_eq!(quotes.history_len(), 1);
    }

    #[tokio::test]
    async fn reapplying_is_a_no_op() {
        let (_jobs, quotes, unit, id) = setup().await;
        let c = completion(&id);

        unit.apply(&c).await.unwrap();
        unit.apply(&c).await.unwrap();

        assert_eq!(quotes.history_len(), 1);
    }

    #[tokio::test]
    async fn failed_job_rejects_completion() {
        let (jobs, quotes, unit, id) = setup().await;
        jobs.update_status(
            &id,
            StatusChange::Failed {
                error: "claim lease expired".into(),
                at: Utc::now(),
            },
        )
        .await
        .unwrap();

        let err = unit.apply(&completion(&id)).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(jobs.get(&id).await.unwrap().unwrap().status, QuoteUpdateStatus::Failed);
        assert_eq!(quotes.history_len(), 0);
    }

    /// Fails the job right after handing out the snapshot, like a sweep racing
    /// the completion.
    struct SweptAfterRead {
        inner: Arc<InMemoryJobStore>,
    }

    #[async_trait]
    impl JobStore for SweptAfterRead {
        async fn create_queued(&self, pair: Pair) -> Result<QuoteUpdateId, JobStoreError> {
            self.inner.create_queued(pair).await
        }

        async fn get(&self, id: &QuoteUpdateId) -> Result<Option<fxrates_core::QuoteUpdate>, JobStoreError> {
            let snapshot = self.inner.get(id).await?;
            let failed = StatusChange::Failed {
                error: "claim lease expired".into(),
                at: Utc::now(),
            };
            self.inner.update_status(id, failed).await?;
            Ok(snapshot)
        }

        async fn claim_queued(&self, limit: usize) -> Result<Vec<crate::jobs::ClaimedJob>, JobStoreError> {
            self.inner.claim_queued(limit).await
        }

        async fn claim(&self, id: &QuoteUpdateId) -> Result<bool, JobStoreError> {
            self.inner.claim(id).await
        }

        async fn update_status(&self, id: &QuoteUpdateId, change: StatusChange) -> Result<(), JobStoreError> {
            self.inner.update_status(id, change).await
        }

        async fn fail_stale(
            &self,
            lease: std::time::Duration,
            now: chrono::DateTime<Utc>,
        ) -> Result<Vec<QuoteUpdateId>, JobStoreError> {
            self.inner.fail_stale(lease, now).await
        }
    }

    #[tokio::test]
    async fn sweep_between_check_and_finish_keeps_job_failed() {
        let (jobs, quotes, _, id) = setup().await;
        let unit = OrderedCompletionUnit::new(Arc::new(SweptAfterRead { inner: jobs.clone() }), quotes.clone());

        let err = unit.apply(&completion(&id)).await.unwrap_err();
        assert!(matches!(
            err,
            CompletionError::Jobs(JobStoreError::InvalidTransition {
                from: QuoteUpdateStatus::Failed,
                to: QuoteUpdateStatus::Done,
                ..
            })
        ));
        assert!(!err.is_transient());

        let job = jobs.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, QuoteUpdateStatus::Failed);
        assert_eq!(job.price, None);
        // The writes ahead of the status change already landed.
        assert_eq!(quotes.history_len(), 1);
    }
}
