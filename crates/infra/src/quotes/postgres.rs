//! Postgres-backed quote store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;

use fxrates_core::{Pair, Quote, QuoteHistory, QuoteSource, QuoteUpdateId};

use super::store::{QuoteStore, QuoteStoreError};
use crate::db::describe_sqlx_error;

#[derive(Debug, Clone)]
pub struct PostgresQuoteStore {
    pool: PgPool,
}

impl PostgresQuoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, QuoteStoreError> {
        self.pool.acquire().await.map_err(|e| storage("acquire", e))
    }
}

fn storage(operation: &str, err: sqlx::Error) -> QuoteStoreError {
    QuoteStoreError::Storage(describe_sqlx_error(operation, &err))
}

/// Upsert on an existing connection (pool or transaction).
pub(crate) async fn upsert_quote(conn: &mut PgConnection, quote: &Quote) -> Result<(), QuoteStoreError> {
    sqlx::query(
        r#"
        INSERT INTO quotes (pair, price, updated_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (pair) DO UPDATE
            SET price = EXCLUDED.price, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(quote.pair.to_string())
    .bind(quote.price)
    .bind(quote.updated_at)
    .execute(&mut *conn)
    .await
    .map(|_| ())
    .map_err(|e| storage("upsert_quote", e))
}

/// History insert on an existing connection. `false` when the key already existed.
pub(crate) async fn insert_history(
    conn: &mut PgConnection,
    entry: &QuoteHistory,
) -> Result<bool, QuoteStoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO quotes_history (pair, price, quoted_at, source, update_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (pair, quoted_at, source) DO NOTHING
        "#,
    )
    .bind(entry.pair.to_string())
    .bind(entry.price)
    .bind(entry.quoted_at)
    .bind(entry.source.as_str())
    .bind(entry.update_id.as_ref().map(|id| id.as_str().to_string()))
    .execute(&mut *conn)
    .await
    .map_err(|e| storage("append_history", e))?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl QuoteStore for PostgresQuoteStore {
    #[instrument(skip(self, pair), fields(pair = %pair), err)]
    async fn get_last(&self, pair: Pair) -> Result<Option<Quote>, QuoteStoreError> {
        let row = sqlx::query("SELECT pair, price, updated_at FROM quotes WHERE pair = $1")
            .bind(pair.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("get_last", e))?;

        match row {
            Some(row) => {
                let price: f64 = row.try_get("price").map_err(|e| storage("get_last", e))?;
                let updated_at: DateTime<Utc> =
                    row.try_get("updated_at").map_err(|e| storage("get_last", e))?;
                Ok(Some(Quote::new(pair, price, updated_at)))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, quote), fields(pair = %quote.pair), err)]
    async fn upsert(&self, quote: &Quote) -> Result<(), QuoteStoreError> {
        let mut conn = self.conn().await?;
        upsert_quote(&mut conn, quote).await
    }

    #[instrument(skip(self, entry), fields(pair = %entry.pair, source = %entry.source), err)]
    async fn append_history(&self, entry: &QuoteHistory) -> Result<bool, QuoteStoreError> {
        let mut conn = self.conn().await?;
        insert_history(&mut conn, entry).await
    }

    #[instrument(skip(self, pair), fields(pair = %pair), err)]
    async fn history(&self, pair: Pair, limit: usize) -> Result<Vec<QuoteHistory>, QuoteStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT pair, price, quoted_at, source, update_id
            FROM quotes_history
            WHERE pair = $1
            ORDER BY quoted_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(pair.to_string())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("history", e))?;

        rows.iter().map(history_from_row).collect()
    }

    async fn ping(&self) -> Result<(), QuoteStoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| storage("ping", e))
    }
}

fn history_from_row(row: &PgRow) -> Result<QuoteHistory, QuoteStoreError> {
    let decode = |e| storage("history", e);
    let pair: String = row.try_get("pair").map_err(decode)?;
    let source: String = row.try_get("source").map_err(decode)?;
    let update_id: Option<String> = row.try_get("update_id").map_err(decode)?;

    Ok(QuoteHistory {
        pair: Pair::parse(&pair)
            .map_err(|e| QuoteStoreError::Storage(format!("corrupt pair column: {e}")))?,
        price: row.try_get("price").map_err(decode)?,
        quoted_at: row.try_get("quoted_at").map_err(decode)?,
        source: source
            .parse::<QuoteSource>()
            .map_err(|e| QuoteStoreError::Storage(format!("corrupt source column: {e}")))?,
        update_id: update_id.map(QuoteUpdateId::from_raw),
    })
}
