//! Quote storage abstraction and the in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fxrates_core::{Pair, Quote, QuoteHistory, QuoteSource};

/// Quote store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteStoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Latest quote for a pair, if one was ever stored.
    async fn get_last(&self, pair: Pair) -> Result<Option<Quote>, QuoteStoreError>;

    /// Insert or replace the latest quote for its pair.
    async fn upsert(&self, quote: &Quote) -> Result<(), QuoteStoreError>;

    /// Append to history. Returns `false` when the entry already existed.
    async fn append_history(&self, entry: &QuoteHistory) -> Result<bool, QuoteStoreError>;

    /// Most recent history entries for a pair, newest first.
    async fn history(&self, pair: Pair, limit: usize) -> Result<Vec<QuoteHistory>, QuoteStoreError>;

    async fn ping(&self) -> Result<(), QuoteStoreError> {
        Ok(())
    }
}

#[async_trait]
impl<T: QuoteStore + ?Sized> QuoteStore for Arc<T> {
    async fn get_last(&self, pair: Pair) -> Result<Option<Quote>, QuoteStoreError> {
        (**self).get_last(pair).await
    }

    async fn upsert(&self, quote: &Quote) -> Result<(), QuoteStoreError> {
        (**self).upsert(quote).await
    }

    async fn append_history(&self, entry: &QuoteHistory) -> Result<bool, QuoteStoreError> {
        (**self).append_history(entry).await
    }

    async fn history(&self, pair: Pair, limit: usize) -> Result<Vec<QuoteHistory>, QuoteStoreError> {
        (**self).history(pair, limit).await
    }

    async fn ping(&self) -> Result<(), QuoteStoreError> {
        (**self).ping().await
    }
}

#[derive(Debug, Default)]
struct Tables {
    latest: HashMap<Pair, Quote>,
    history: Vec<QuoteHistory>,
    history_keys: HashSet<(Pair, DateTime<Utc>, QuoteSource)>,
}

/// In-memory quote store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryQuoteStore {
    tables: RwLock<Tables>,
}

impl InMemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total number of history rows across all pairs.
    pub fn history_len(&self) -> usize {
        self.tables.read().map(|t| t.history.len()).unwrap_or(0)
    }

    fn poisoned() -> QuoteStoreError {
        QuoteStoreError::Storage("quote table lock poisoned".to_string())
    }
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn get_last(&self, pair: Pair) -> Result<Option<Quote>, QuoteStoreError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.latest.get(&pair).cloned())
    }

    async fn upsert(&self, quote: &Quote) -> Result<(), QuoteStoreError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        tables.latest.insert(quote.pair, quote.clone());
        Ok(())
    }

    async fn append_history(&self, entry: &QuoteHistory) -> Result<bool, QuoteStoreError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        if !tables.history_keys.insert(entry.key()) {
            return Ok(false);
        }
        tables.history.push(entry.clone());
        Ok(true)
    }

    async fn history(&self, pair: Pair, limit: usize) -> Result<Vec<QuoteHistory>, QuoteStoreError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        let mut rows: Vec<QuoteHistory> = tables
            .history
            .iter()
            .filter(|h| h.pair == pair)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.quoted_at.cmp(&a.quoted_at));
        rows.truncate(limit);
        Ok(rows)
    }
}
