//! Postgres-backed job store.
//!
//! ## Claim
//!
//! `claim_queued` selects the oldest queued rows with `FOR UPDATE SKIP LOCKED`
//! and flips them to `processing` in the same statement, so concurrent workers
//! (in any number of processes) receive disjoint batches without blocking on
//! each other.
//!
//! ## Transitions
//!
//! `update_status` only touches a row whose current status may legally move to
//! the target. When no row is updated, a follow-up read tells `NotFound` apart
//! from `InvalidTransition`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{Span, instrument};

use fxrates_core::{Pair, QuoteUpdate, QuoteUpdateId, QuoteUpdateStatus, StatusChange};

use super::store::{ClaimedJob, IdGenerator, JobStore, JobStoreError, LEASE_EXPIRED};
use crate::db::{describe_sqlx_error, is_unique_violation};

const ALL_STATUSES: [QuoteUpdateStatus; 4] = [
    QuoteUpdateStatus::Queued,
    QuoteUpdateStatus::Processing,
    QuoteUpdateStatus::Done,
    QuoteUpdateStatus::Failed,
];

/// Postgres-backed job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    ids: Arc<IdGenerator>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_ids(pool, IdGenerator::uuid())
    }

    pub fn with_ids(pool: PgPool, ids: IdGenerator) -> Self {
        Self {
            pool,
            ids: Arc::new(ids),
        }
    }
}

fn storage(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(describe_sqlx_error(operation, &err))
}

/// Statuses from which `to` can be reached.
fn allowed_sources(to: QuoteUpdateStatus) -> Vec<String> {
    ALL_STATUSES
        .iter()
        .filter(|from| from.can_transition_to(to))
        .map(|from| from.as_str().to_string())
        .collect()
}

/// Apply a status change on an existing connection (pool or transaction).
pub(crate) async fn apply_status(
    conn: &mut PgConnection,
    id: &QuoteUpdateId,
    change: StatusChange,
) -> Result<(), JobStoreError> {
    let to = change.target();
    let (price, error, at): (Option<f64>, Option<String>, DateTime<Utc>) = match change {
        StatusChange::Processing { at } => (None, None, at),
        StatusChange::Done { price, at } => (Some(price), None, at),
        StatusChange::Failed { error, at } => (None, Some(error), at),
    };

    let updated = sqlx::query(
        r#"
        UPDATE quote_updates
        SET status = $2,
            price = COALESCE($3, price),
            error = CASE WHEN $2 = 'done' THEN NULL ELSE COALESCE($4, error) END,
            claimed_at = CASE WHEN $2 = 'processing' THEN $5 ELSE claimed_at END,
            completed_at = CASE WHEN $2 IN ('done', 'failed') THEN $5 ELSE completed_at END
        WHERE id = $1 AND status = ANY($6)
        "#,
    )
    .bind(id.as_str())
    .bind(to.as_str())
    .bind(price)
    .bind(error)
    .bind(at)
    .bind(allowed_sources(to))
    .execute(&mut *conn)
    .await
    .map_err(|e| storage("update_status", e))?;

    if updated.rows_affected() == 1 {
        return Ok(());
    }

    let current: Option<String> = sqlx::query_scalar("SELECT status FROM quote_updates WHERE id = $1")
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| storage("update_status_lookup", e))?;

    match current {
        None => Err(JobStoreError::NotFound(id.clone())),
        Some(from) => Err(JobStoreError::InvalidTransition {
            id: id.clone(),
            from: parse_status(&from)?,
            to,
        }),
    }
}

fn parse_status(raw: &str) -> Result<QuoteUpdateStatus, JobStoreError> {
    raw.parse()
        .map_err(|e| JobStoreError::Storage(format!("corrupt status column: {e}")))
}

fn parse_pair(raw: &str) -> Result<Pair, JobStoreError> {
    Pair::parse(raw).map_err(|e| JobStoreError::Storage(format!("corrupt pair column: {e}")))
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, pair), fields(pair = %pair, update_id), err)]
    async fn create_queued(&self, pair: Pair) -> Result<QuoteUpdateId, JobStoreError> {
        let id = self.ids.next_id();
        Span::current().record("update_id", id.as_str());

        sqlx::query(
            r#"
            INSERT INTO quote_updates (id, pair, status, requested_at)
            VALUES ($1, $2, 'queued', NOW())
            "#,
        )
        .bind(id.as_str())
        .bind(pair.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::Storage(format!("duplicate job id: {id}"))
            } else {
                storage("create_queued", e)
            }
        })?;

        Ok(id)
    }

    #[instrument(skip(self, id), fields(update_id = %id), err)]
    async fn get(&self, id: &QuoteUpdateId) -> Result<Option<QuoteUpdate>, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, pair, status, error, price, requested_at, claimed_at, completed_at
            FROM quote_updates
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("get", e))?;

        match row {
            Some(r) => Ok(Some(QuoteUpdate::try_from(QuoteUpdateRow::from_pg_row(&r)?)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(claimed), err)]
    async fn claim_queued(&self, limit: usize) -> Result<Vec<ClaimedJob>, JobStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            WITH cte AS (
                SELECT id
                FROM quote_updates
                WHERE status = 'queued'
                ORDER BY requested_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE quote_updates q
            SET status = 'processing', claimed_at = NOW()
            FROM cte
            WHERE q.id = cte.id
            RETURNING q.id, q.pair, q.requested_at
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("claim_queued", e))?;

        // RETURNING order is unspecified; restore oldest-first.
        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(|e| storage("claim_queued", e))?;
            let pair: String = row.try_get("pair").map_err(|e| storage("claim_queued", e))?;
            let requested_at: DateTime<Utc> = row
                .try_get("requested_at")
                .map_err(|e| storage("claim_queued", e))?;
            claimed.push((
                requested_at,
                ClaimedJob {
                    id: QuoteUpdateId::from_raw(id),
                    pair: parse_pair(&pair)?,
                },
            ));
        }
        claimed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        Span::current().record("claimed", claimed.len());
        Ok(claimed.into_iter().map(|(_, job)| job).collect())
    }

    #[instrument(skip(self, id), fields(update_id = %id), err)]
    async fn claim(&self, id: &QuoteUpdateId) -> Result<bool, JobStoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE quote_updates
            SET status = 'processing', claimed_at = NOW()
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| storage("claim", e))?;

        if updated.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM quote_updates WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("claim_lookup", e))?;

        match exists {
            Some(_) => Ok(false),
            None => Err(JobStoreError::NotFound(id.clone())),
        }
    }

    #[instrument(skip(self, id, change), fields(update_id = %id, to = %change.target()), err)]
    async fn update_status(&self, id: &QuoteUpdateId, change: StatusChange) -> Result<(), JobStoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage("acquire", e))?;
        apply_status(&mut conn, id, change).await
    }

    #[instrument(skip(self), fields(swept), err)]
    async fn fail_stale(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<QuoteUpdateId>, JobStoreError> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| JobStoreError::Storage(format!("invalid lease: {e}")))?;
        let cutoff = now - lease;

        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE quote_updates
            SET status = 'failed', error = $2, completed_at = $3
            WHERE status = 'processing' AND claimed_at < $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .bind(LEASE_EXPIRED)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("fail_stale", e))?;

        Span::current().record("swept", ids.len());
        let mut ids: Vec<QuoteUpdateId> = ids.into_iter().map(QuoteUpdateId::from_raw).collect();
        ids.sort();
        Ok(ids)
    }

    async fn ping(&self) -> Result<(), JobStoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| storage("ping", e))
    }
}

// SQLx row types

#[derive(Debug)]
struct QuoteUpdateRow {
    id: String,
    pair: String,
    status: String,
    error: Option<String>,
    price: Option<f64>,
    requested_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl QuoteUpdateRow {
    fn from_pg_row(row: &PgRow) -> Result<Self, JobStoreError> {
        <Self as sqlx::FromRow<'_, PgRow>>::from_row(row).map_err(|e| storage("decode_row", e))
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for QuoteUpdateRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(QuoteUpdateRow {
            id: row.try_get("id")?,
            pair: row.try_get("pair")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            price: row.try_get("price")?,
            requested_at: row.try_get("requested_at")?,
            claimed_at: row.try_get("claimed_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl TryFrom<QuoteUpdateRow> for QuoteUpdate {
    type Error = JobStoreError;

    fn try_from(row: QuoteUpdateRow) -> Result<Self, Self::Error> {
        Ok(QuoteUpdate {
            id: QuoteUpdateId::from_raw(row.id),
            pair: parse_pair(&row.pair)?,
            status: parse_status(&row.status)?,
            error: row.error,
            price: row.price,
            requested_at: row.requested_at,
            claimed_at: row.claimed_at,
            completed_at: row.completed_at,
        })
    }
}
