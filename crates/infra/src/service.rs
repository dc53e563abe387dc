//! Quote update orchestration.
//!
//! `FxRatesService` owns intake (submit and query) and the completion
//! protocol. It is the only component that moves a job into a terminal
//! status; drivers only decide which jobs to run and where quotes come from.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{Span, debug, info, instrument, warn};

use fxrates_core::{Pair, Quote, QuoteSource, QuoteUpdate, QuoteUpdateId, StatusChange};

use crate::completion::{Completion, CompletionError, CompletionUnit};
use crate::idempotency::{IdempotencyError, IdempotencyGate};
use crate::jobs::{ClaimedJob, JobStore, JobStoreError};
use crate::provider::{FetchError, RateProvider};
use crate::quotes::{QuoteStore, QuoteStoreError};
use crate::retry::RetryPolicy;
use crate::workers::queue::{DispatchError, DispatchedJob, JobDispatcher};

pub const QUEUE_FULL: &str = "dispatch queue full";

/// Service-level error. Each variant maps to one HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("store error: {0}")]
    Store(String),
}

impl From<JobStoreError> for ServiceError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => ServiceError::NotFound(format!("quote update {id}")),
            other => ServiceError::Store(other.to_string()),
        }
    }
}

impl From<QuoteStoreError> for ServiceError {
    fn from(err: QuoteStoreError) -> Self {
        ServiceError::Store(err.to_string())
    }
}

impl From<IdempotencyError> for ServiceError {
    fn from(err: IdempotencyError) -> Self {
        ServiceError::Store(err.to_string())
    }
}

impl From<CompletionError> for ServiceError {
    fn from(err: CompletionError) -> Self {
        ServiceError::Store(err.to_string())
    }
}

impl From<FetchError> for ServiceError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::UnsupportedPair(pair) => ServiceError::BadRequest(format!("unsupported pair {pair}")),
            other => ServiceError::Provider(other.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub struct FxRatesService {
    jobs: Arc<dyn JobStore>,
    quotes: Arc<dyn QuoteStore>,
    idempotency: Arc<dyn IdempotencyGate>,
    provider: Arc<dyn RateProvider>,
    completion: Arc<dyn CompletionUnit>,
    dispatcher: Option<Arc<dyn JobDispatcher>>,
    request_timeout: Duration,
    persist_retry: RetryPolicy,
}

impl FxRatesService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        quotes: Arc<dyn QuoteStore>,
        idempotency: Arc<dyn IdempotencyGate>,
        provider: Arc<dyn RateProvider>,
        completion: Arc<dyn CompletionUnit>,
    ) -> Self {
        Self {
            jobs,
            quotes,
            idempotency,
            provider,
            completion,
            dispatcher: None,
            request_timeout: Duration::from_secs(3),
            persist_retry: RetryPolicy::default(),
        }
    }

    /// Hand every new job to `dispatcher` right after it is created.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_persist_retry(mut self, policy: RetryPolicy) -> Self {
        self.persist_retry = policy;
        self
    }

    /// Provider used for local fetches (poller, channel, remote fetch endpoint).
    pub fn provider(&self) -> Arc<dyn RateProvider> {
        self.provider.clone()
    }

    /// Submit a refresh of `pair`, deduplicated by `idempotency_key`.
    #[instrument(skip(self, pair, idempotency_key), fields(pair = %pair, update_id), err)]
    pub async fn request_quote_update(&self, pair: &str, idempotency_key: &str) -> ServiceResult<QuoteUpdateId> {
        let key = idempotency_key.trim();
        if key.is_empty() {
            return Err(ServiceError::BadRequest("missing idempotency key".to_string()));
        }
        let pair = Pair::parse(pair).map_err(|e| ServiceError::BadRequest(e.to_string()))?;

        let id = tokio::time::timeout(self.request_timeout, self.reserve_and_create(key, pair))
            .await
            .map_err(|_| ServiceError::Store("deadline exceeded".to_string()))??;
        Span::current().record("update_id", tracing::field::display(&id));

        if let Some(dispatcher) = &self.dispatcher {
            let job = DispatchedJob { id: id.clone(), pair };
            if let Err(err) = dispatcher.dispatch(job).await {
                self.reject_undispatched(&id, &err).await;
                return Err(ServiceError::Unavailable(err.to_string()));
            }
        }

        info!(update_id = %id, pair = %pair, "quote_update_requested");
        Ok(id)
    }

    async fn reserve_and_create(&self, key: &str, pair: Pair) -> ServiceResult<QuoteUpdateId> {
        if !self.idempotency.try_reserve(key).await? {
            return Err(ServiceError::Conflict(format!("idempotency key {key} already used")));
        }
        Ok(self.jobs.create_queued(pair).await?)
    }

    /// A job nobody will pick up must not sit in `queued` forever.
    async fn reject_undispatched(&self, id: &QuoteUpdateId, err: &DispatchError) {
        warn!(update_id = %id, error = %err, "dispatch_rejected");
        match self.jobs.claim(id).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(update_id = %id, error = %e, "dispatch_reject_claim_failed");
                return;
            }
        }
        let reason = match err {
            DispatchError::QueueFull => QUEUE_FULL.to_string(),
            other => other.to_string(),
        };
        if let Err(e) = self.fail(id, reason).await {
            warn!(update_id = %id, error = %e, "dispatch_reject_fail_failed");
        }
    }

    #[instrument(skip(self), err)]
    pub async fn get_quote_update(&self, id: &str) -> ServiceResult<QuoteUpdate> {
        let id: QuoteUpdateId = id
            .parse()
            .map_err(|_| ServiceError::NotFound(format!("quote update {id}")))?;
        self.jobs
            .get(&id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("quote update {id}")))
    }

    #[instrument(skip(self), err)]
    pub async fn get_last_quote(&self, pair: &str) -> ServiceResult<Quote> {
        let pair = Pair::parse(pair).map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        self.quotes
            .get_last(pair)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no quote for {pair}")))
    }

    /// Fetch a quote from the local provider without touching any store.
    #[instrument(skip(self), err)]
    pub async fn fetch_quote(&self, pair: &str) -> ServiceResult<Quote> {
        let pair = Pair::parse(pair).map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        Ok(self.provider.fetch(pair).await?)
    }

    pub async fn claim_batch(&self, limit: usize) -> ServiceResult<Vec<ClaimedJob>> {
        Ok(self.jobs.claim_queued(limit).await?)
    }

    pub async fn claim(&self, id: &QuoteUpdateId) -> ServiceResult<bool> {
        Ok(self.jobs.claim(id).await?)
    }

    /// Fail every job that has been `processing` for longer than `lease`.
    pub async fn sweep_stale(&self, lease: Duration) -> ServiceResult<Vec<QuoteUpdateId>> {
        let swept = self.jobs.fail_stale(lease, Utc::now()).await?;
        for id in &swept {
            warn!(update_id = %id, lease_ms = lease.as_millis() as u64, "claim_lease_expired");
        }
        Ok(swept)
    }

    /// Run the completion protocol for a claimed job.
    ///
    /// A failed `fetch` fails the job and writes nothing else. A fetched quote
    /// is persisted with retries; if persistence never succeeds the job is
    /// failed so it does not stay `processing`.
    #[instrument(skip(self, id, source, fetch), fields(update_id = %id, source = %source), err)]
    pub async fn complete_quote_update<F>(
        &self,
        id: &QuoteUpdateId,
        source: QuoteSource,
        fetch: F,
    ) -> ServiceResult<()>
    where
        F: Future<Output = Result<Quote, FetchError>> + Send,
    {
        let quote = match fetch.await {
            Ok(quote) => quote,
            Err(err) => {
                self.fail(id, err.to_string()).await?;
                return Err(ServiceError::Provider(err.to_string()));
            }
        };

        let completion = Completion {
            update_id: id.clone(),
            source,
            quote,
        };
        let persisted = self
            .persist_retry
            .run("complete_quote_update", CompletionError::is_transient, |_| {
                self.completion.apply(&completion)
            })
            .await;

        match persisted {
            Ok(()) => {
                info!(
                    update_id = %id,
                    pair = %completion.quote.pair,
                    price = completion.quote.price,
                    "quote_update_done"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(fail_err) = self.fail(id, format!("persist failed: {err}")).await {
                    warn!(update_id = %id, error = %fail_err, "persist_failure_not_recorded");
                }
                Err(err.into())
            }
        }
    }

    /// Claimed job, local or remote provider, bounded by `timeout`.
    pub async fn run_claimed(
        &self,
        job: &ClaimedJob,
        source: QuoteSource,
        provider: &dyn RateProvider,
        timeout: Duration,
    ) -> ServiceResult<()> {
        let fetch = async {
            match tokio::time::timeout(timeout, provider.fetch(job.pair)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(timeout)),
            }
        };
        self.complete_quote_update(&job.id, source, fetch).await
    }

    /// Move a `processing` job to `failed`. A job that is already terminal is
    /// left alone.
    async fn fail(&self, id: &QuoteUpdateId, error: String) -> ServiceResult<()> {
        let change = StatusChange::Failed {
            error,
            at: Utc::now(),
        };
        match self.jobs.update_status(id, change).await {
            Ok(()) => {
                warn!(update_id = %id, "quote_update_failed");
                Ok(())
            }
            Err(JobStoreError::InvalidTransition { from, .. }) if from.is_terminal() => {
                debug!(update_id = %id, status = %from, "already terminal");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Readiness: every backing store answers.
    pub async fn ready(&self) -> ServiceResult<()> {
        self.jobs.ping().await?;
        self.quotes.ping().await?;
        Ok(())
    }
}

impl core::fmt::Debug for FxRatesService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FxRatesService")
            .field("provider", &self.provider.name())
            .field("dispatcher", &self.dispatcher.is_some())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

