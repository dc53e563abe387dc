//! Job storage abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use fxrates_core::{DomainError, Pair, QuoteUpdate, QuoteUpdateId, QuoteUpdateStatus, StatusChange};

/// Error text recorded on jobs failed by the lease sweep.
pub const LEASE_EXPIRED: &str = "claim lease expired";

/// A job handed to a worker by a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: QuoteUpdateId,
    pub pair: Pair,
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(QuoteUpdateId),
    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: QuoteUpdateId,
        from: QuoteUpdateStatus,
        to: QuoteUpdateStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

impl JobStoreError {
    fn from_domain(id: &QuoteUpdateId, err: DomainError) -> Self {
        match err {
            DomainError::InvalidTransition { from, to } => Self::InvalidTransition {
                id: id.clone(),
                from,
                to,
            },
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `queued` job and return its id.
    async fn create_queued(&self, pair: Pair) -> Result<QuoteUpdateId, JobStoreError>;

    /// Get a job by id.
    async fn get(&self, id: &QuoteUpdateId) -> Result<Option<QuoteUpdate>, JobStoreError>;

    /// Atomically claim up to `limit` of the oldest queued jobs.
    async fn claim_queued(&self, limit: usize) -> Result<Vec<ClaimedJob>, JobStoreError>;

    /// Atomically claim one job by id. `Ok(false)` if it is no longer queued.
    async fn claim(&self, id: &QuoteUpdateId) -> Result<bool, JobStoreError>;

    /// Apply a lifecycle change. Illegal edges fail with `InvalidTransition`.
    async fn update_status(&self, id: &QuoteUpdateId, change: StatusChange) -> Result<(), JobStoreError>;

    /// Fail `processing` jobs whose claim is older than `lease` at `now`.
    async fn fail_stale(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<QuoteUpdateId>, JobStoreError>;

    /// Cheap liveness check for readiness probes.
    async fn ping(&self) -> Result<(), JobStoreError> {
        Ok(())
    }
}

#[async_trait]
impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    async fn create_queued(&self, pair: Pair) -> Result<QuoteUpdateId, JobStoreError> {
        (**self).create_queued(pair).await
    }

    async fn get(&self, id: &QuoteUpdateId) -> Result<Option<QuoteUpdate>, JobStoreError> {
        (**self).get(id).await
    }

    async fn claim_queued(&self, limit: usize) -> Result<Vec<ClaimedJob>, JobStoreError> {
        (**self).claim_queued(limit).await
    }

    async fn claim(&self, id: &QuoteUpdateId) -> Result<bool, JobStoreError> {
        (**self).claim(id).await
    }

    async fn update_status(&self, id: &QuoteUpdateId, change: StatusChange) -> Result<(), JobStoreError> {
        (**self).update_status(id, change).await
    }

    async fn fail_stale(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<QuoteUpdateId>, JobStoreError> {
        (**self).fail_stale(lease, now).await
    }

    async fn ping(&self) -> Result<(), JobStoreError> {
        (**self).ping().await
    }
}

/// Job id generation strategy.
#[derive(Debug)]
pub enum IdGenerator {
    /// UUIDv7 strings.
    Uuid,
    /// `update-1`, `update-2`, ...
    Sequential(AtomicU64),
}

impl IdGenerator {
    pub fn uuid() -> Self {
        Self::Uuid
    }

    pub fn sequential() -> Self {
        Self::Sequential(AtomicU64::new(0))
    }

    pub fn next_id(&self) -> QuoteUpdateId {
        match self {
            IdGenerator::Uuid => QuoteUpdateId::new(),
            IdGenerator::Sequential(counter) => {
                QuoteUpdateId::sequential("update", counter.fetch_add(1, Ordering::SeqCst) + 1)
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::uuid()
    }
}

#[derive(Debug)]
struct Row {
    /// Insertion order; breaks ties between equal `requested_at`.
    seq: u64,
    job: QuoteUpdate,
}

#[derive(Debug, Default)]
struct Table {
    rows: HashMap<QuoteUpdateId, Row>,
    next_seq: u64,
}

/// In-memory job store for tests/dev.
///
/// One write lock covers select + transition, which is what makes the claim a
/// compare-and-swap.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    table: RwLock<Table>,
    ids: IdGenerator,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: IdGenerator) -> Self {
        Self {
            table: RwLock::default(),
            ids,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.table.read().map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Table>, JobStoreError> {
        self.table
            .write()
            .map_err(|_| JobStoreError::Storage("job table lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    #[instrument(skip(self, pair), fields(pair = %pair), err)]
    async fn create_queued(&self, pair: Pair) -> Result<QuoteUpdateId, JobStoreError> {
        let id = self.ids.next_id();
        let mut table = self.write()?;
        if table.rows.contains_key(&id) {
            return Err(JobStoreError::Storage(format!("duplicate job id: {id}")));
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.rows.insert(
            id.clone(),
            Row {
                seq,
                job: QuoteUpdate::queued(id.clone(), pair, Utc::now()),
            },
        );
        debug!(update_id = %id, "job queued");
        Ok(id)
    }

    async fn get(&self, id: &QuoteUpdateId) -> Result<Option<QuoteUpdate>, JobStoreError> {
        let table = self
            .table
            .read()
            .map_err(|_| JobStoreError::Storage("job table lock poisoned".to_string()))?;
        Ok(table.rows.get(id).map(|row| row.job.clone()))
    }

    async fn claim_queued(&self, limit: usize) -> Result<Vec<ClaimedJob>, JobStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut table = self.write()?;
        let mut candidates: Vec<(DateTime<Utc>, u64, QuoteUpdateId)> = table
            .rows
            .values()
            .filter(|row| row.job.status == QuoteUpdateStatus::Queued)
            .map(|row| (row.job.requested_at, row.seq, row.job.id.clone()))
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, _, id) in candidates {
            if let Some(row) = table.rows.get_mut(&id) {
                row.job
                    .apply(StatusChange::Processing { at: now })
                    .map_err(|e| JobStoreError::from_domain(&id, e))?;
                claimed.push(ClaimedJob {
                    id,
                    pair: row.job.pair,
                });
            }
        }
        Ok(claimed)
    }

    async fn claim(&self, id: &QuoteUpdateId) -> Result<bool, JobStoreError> {
        let mut table = self.write()?;
        let row = table
            .rows
            .get_mut(id)
            .ok_or_else(|| JobStoreError::NotFound(id.clone()))?;
        if row.job.status != QuoteUpdateStatus::Queued {
            return Ok(false);
        }
        row.job
            .apply(StatusChange::Processing { at: Utc::now() })
            .map_err(|e| JobStoreError::from_domain(id, e))?;
        Ok(true)
    }

    #[instrument(skip(self, id, change), fields(update_id = %id, to = %change.target()), err)]
    async fn update_status(&self, id: &QuoteUpdateId, change: StatusChange) -> Result<(), JobStoreError> {
        let mut table = self.write()?;
        let row = table
            .rows
            .get_mut(id)
            .ok_or_else(|| JobStoreError::NotFound(id.clone()))?;
        row.job
            .apply(change)
            .map_err(|e| JobStoreError::from_domain(id, e))
    }

    async fn fail_stale(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<QuoteUpdateId>, JobStoreError> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| JobStoreError::Storage(format!("invalid lease: {e}")))?;
        let mut table = self.write()?;
        let mut failed = Vec::new();
        for row in table.rows.values_mut() {
            let stale = row.job.status == QuoteUpdateStatus::Processing
                && row.job.claimed_at.is_some_and(|claimed| claimed + lease < now);
            if stale {
                row.job
                    .apply(StatusChange::Failed {
                        error: LEASE_EXPIRED.to_string(),
                        at: now,
                    })
                    .map_err(|e| JobStoreError::from_domain(&row.job.id, e))?;
                failed.push(row.job.id.clone());
            }
        }
        failed.sort();
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn eur_usd() -> Pair {
        Pair::parse("EUR/USD").unwrap()
    }

    #[tokio::test]
    async fn sequential_ids_start_at_one() {
        let store = InMemoryJobStore::with_ids(IdGenerator::sequential());
        let a = store.create_queued(eur_usd()).await.unwrap();
        let b = store.create_queued(eur_usd()).await.unwrap();
        assert_eq!(a.as_str(), "update-1");
        assert_eq!(b.as_str(), "update-2");

        let job = store.get(&a).await.unwrap().unwrap();
        assert_eq!(job.status, QuoteUpdateStatus::Queued);
        assert!(job.price.is_none());
    }

    #[tokio::test]
    async fn claim_batch_then_nothing_left() {
        let store = InMemoryJobStore::new();
        for _ in 0..3 {
            store.create_queued(eur_usd()).await.unwrap();
        }

        let claimed = store.claim_queued(10).await.unwrap();
        assert_eq!(claimed.len(), 3);
        for job in &claimed {
            let stored = store.get(&job.id).await.unwrap().unwrap();
            assert_eq!(stored.status, QuoteUpdateStatus::Processing);
            assert!(stored.claimed_at.is_some());
        }

        assert!(store.claim_queued(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_is_oldest_first_and_zero_limit_claims_nothing() {
        let store = InMemoryJobStore::with_ids(IdGenerator::sequential());
        for _ in 0..5 {
            store.create_queued(eur_usd()).await.unwrap();
        }

        assert!(store.claim_queued(0).await.unwrap().is_empty());

        let first: Vec<String> = store
            .claim_queued(2)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id.to_string())
            .collect();
        assert_eq!(first, vec!["update-1", "update-2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_are_disjoint() {
        let store = Arc::new(InMemoryJobStore::new());
        let total = 200;
        for _ in 0..total {
            store.create_queued(eur_usd()).await.unwrap();
        }

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let batch = store.claim_queued(7).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    mine.extend(batch.into_iter().map(|j| j.id));
                }
                mine
            });
        }

        let mut seen = HashSet::new();
        let mut count = 0;
        while let Some(result) = tasks.join_next().await {
            for id in result.unwrap() {
                count += 1;
                assert!(seen.insert(id), "job claimed twice");
            }
        }
        assert_eq!(count, total);
    }

    #[tokio::test]
    async fn single_claim_is_compare_and_swap() {
        let store = InMemoryJobStore::new();
        let id = store.create_queued(eur_usd()).await.unwrap();

        assert!(store.claim(&id).await.unwrap());
        assert!(!store.claim(&id).await.unwrap());
        assert!(store.claim_queued(10).await.unwrap().is_empty());

        let missing = QuoteUpdateId::sequential("update", 99);
        assert!(matches!(store.claim(&missing).await, Err(JobStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_status_never_downgrades() {
        let store = InMemoryJobStore::new();
        let id = store.create_queued(eur_usd()).await.unwrap();
        store.claim(&id).await.unwrap();

        let at = Utc::now();
        store
            .update_status(&id, StatusChange::Done { price: 1.5, at })
            .await
            .unwrap();

        let err = store
            .update_status(&id, StatusChange::Failed { error: "late".into(), at })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobStoreError::InvalidTransition {
                from: QuoteUpdateStatus::Done,
                to: QuoteUpdateStatus::Failed,
                ..
            }
        ));

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, QuoteUpdateStatus::Done);
        assert_eq!(job.price, Some(1.5));
        assert_eq!(job.updated_at(), at);
    }

    #[tokio::test]
    async fn update_status_unknown_id_is_not_found() {
        let store = InMemoryJobStore::new();
        let err = store
            .update_status(&QuoteUpdateId::new(), StatusChange::Processing { at: Utc::now() })
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn lease_sweep_fails_only_expired_processing_jobs() {
        let store = InMemoryJobStore::with_ids(IdGenerator::sequential());
        let stale = store.create_queued(eur_usd()).await.unwrap();
        let queued = store.create_queued(eur_usd()).await.unwrap();
        store.claim(&stale).await.unwrap();

        let lease = Duration::from_secs(30);

        // Inside the lease: nothing happens.
        let swept = store.fail_stale(lease, Utc::now()).await.unwrap();
        assert!(swept.is_empty());

        let later = Utc::now() + chrono::Duration::seconds(31);
        let swept = store.fail_stale(lease, later).await.unwrap();
        assert_eq!(swept, vec![stale.clone()]);

        let job = store.get(&stale).await.unwrap().unwrap();
        assert_eq!(job.status, QuoteUpdateStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(LEASE_EXPIRED));

        let untouched = store.get(&queued).await.unwrap().unwrap();
        assert_eq!(untouched.status, QuoteUpdateStatus::Queued);
    }
}
