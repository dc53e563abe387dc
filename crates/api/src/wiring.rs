//! Build the runtime components selected by `Config`.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fxrates_infra::FxRatesService;
use fxrates_infra::completion::{CompletionUnit, OrderedCompletionUnit, PostgresCompletionUnit};
use fxrates_infra::config::{Config, IdStyle, IdempotencyKind, ProviderKind, StorageKind, WorkerType};
use fxrates_infra::db;
use fxrates_infra::idempotency::{IdempotencyGate, InMemoryIdempotency, NoopIdempotency, RedisIdempotency};
use fxrates_infra::jobs::{IdGenerator, InMemoryJobStore, JobStore, PostgresJobStore};
use fxrates_infra::provider::{ExchangeRatesApiProvider, FixedRateProvider, RateProvider, RemoteRateProvider};
use fxrates_infra::quotes::{InMemoryQuoteStore, PostgresQuoteStore, QuoteStore};
use fxrates_infra::workers::{
    JobQueue, PollerConfig, WorkerHandle, spawn_channel_worker, spawn_delegate_worker, spawn_poller,
};

/// Job store, quote store, and the completion unit that matches them.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub quotes: Arc<dyn QuoteStore>,
    pub completion: Arc<dyn CompletionUnit>,
}

fn id_generator(config: &Config) -> IdGenerator {
    match config.id_style {
        IdStyle::Uuid => IdGenerator::uuid(),
        IdStyle::Sequential => IdGenerator::sequential(),
    }
}

pub async fn build_stores(config: &Config) -> anyhow::Result<Stores> {
    match config.storage {
        StorageKind::Memory => {
            let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::with_ids(id_generator(config)));
            let quotes: Arc<dyn QuoteStore> = Arc::new(InMemoryQuoteStore::new());
            let completion: Arc<dyn CompletionUnit> =
                Arc::new(OrderedCompletionUnit::new(jobs.clone(), quotes.clone()));
            info!(storage = "memory", "stores_ready");
            Ok(Stores {
                jobs,
                quotes,
                completion,
            })
        }
        StorageKind::Pg => {
            let url = config
                .database_url
                .as_deref()
                .context("STORAGE=pg requires DATABASE_URL")?;
            let pool = db::connect(url, config.pg_max_conns)
                .await
                .context("connect to postgres")?;
            db::migrate(&pool).await.context("apply database schema")?;
            info!(storage = "pg", max_conns = config.pg_max_conns, "stores_ready");
            Ok(Stores {
                jobs: Arc::new(PostgresJobStore::with_ids(pool.clone(), id_generator(config))),
                quotes: Arc::new(PostgresQuoteStore::new(pool.clone())),
                completion: Arc::new(PostgresCompletionUnit::new(pool)),
            })
        }
    }
}

pub async fn build_idempotency(config: &Config) -> anyhow::Result<Arc<dyn IdempotencyGate>> {
    let gate: Arc<dyn IdempotencyGate> = match config.idempotency {
        IdempotencyKind::Noop => Arc::new(NoopIdempotency),
        IdempotencyKind::Memory => Arc::new(InMemoryIdempotency::new(config.idempotency_ttl)),
        IdempotencyKind::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("IDEMPOTENCY=redis requires REDIS_URL")?;
            Arc::new(
                RedisIdempotency::connect(url, config.idempotency_ttl)
                    .await
                    .context("connect to redis")?,
            )
        }
    };
    Ok(gate)
}

pub fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn RateProvider>> {
    let provider: Arc<dyn RateProvider> = match config.provider {
        ProviderKind::Fake => Arc::new(FixedRateProvider::new(config.fake_price)),
        ProviderKind::ExchangeRatesApi => {
            let base = config
                .exchange_api_base
                .as_deref()
                .context("PROVIDER=exchangeratesapi requires EXCHANGE_API_BASE")?;
            let key = config
                .exchange_api_key
                .as_deref()
                .context("PROVIDER=exchangeratesapi requires EXCHANGE_API_KEY")?;
            Arc::new(ExchangeRatesApiProvider::new(base, key, config.http_retry_policy()))
        }
    };
    info!(provider = provider.name(), "provider_ready");
    Ok(provider)
}

fn build_service(
    config: &Config,
    stores: &Stores,
    idempotency: Arc<dyn IdempotencyGate>,
    provider: Arc<dyn RateProvider>,
) -> FxRatesService {
    FxRatesService::new(
        stores.jobs.clone(),
        stores.quotes.clone(),
        idempotency,
        provider,
        stores.completion.clone(),
    )
    .with_request_timeout(config.request_timeout)
    .with_persist_retry(config.persist_retry_policy())
}

/// An intake service plus the in-process drivers it feeds.
pub struct Runtime {
    pub service: Arc<FxRatesService>,
    pub workers: Vec<WorkerHandle>,
}

impl Runtime {
    /// Stop every driver within `grace`.
    pub async fn shutdown(self, grace: std::time::Duration) {
        for worker in self.workers {
            let name = worker.name();
            if !worker.shutdown(grace).await {
                tracing::warn!(worker = name, "worker_not_drained");
            }
        }
    }
}

/// Components for the API process.
///
/// `chan` and `delegate` drivers consume an in-process queue fed at intake,
/// so they run here. The `db` poller normally runs in the worker process, but
/// in-memory stores are private to this process, so with `STORAGE=memory` the
/// poller runs here too.
pub async fn build_api(config: &Config, token: &CancellationToken) -> anyhow::Result<Runtime> {
    let stores = build_stores(config).await?;
    let idempotency = build_idempotency(config).await?;
    let provider = build_provider(config)?;
    let base = build_service(config, &stores, idempotency, provider);

    match config.worker_type {
        WorkerType::Db => {
            let service = Arc::new(base);
            let workers = match config.storage {
                StorageKind::Memory => {
                    vec![spawn_poller(service.clone(), PollerConfig::from(config), token.child_token())]
                }
                StorageKind::Pg => Vec::new(),
            };
            Ok(Runtime { service, workers })
        }
        WorkerType::Chan => {
            let (queue, rx) = JobQueue::bounded(config.chan_queue_size, config.chan_enqueue_timeout);
            let service = Arc::new(base.with_dispatcher(Arc::new(queue)));
            let worker = spawn_channel_worker(service.clone(), rx, config.job_timeout, token.child_token());
            Ok(Runtime {
                service,
                workers: vec![worker],
            })
        }
        WorkerType::Delegate => {
            let target = config
                .delegate_target
                .as_deref()
                .context("WORKER_TYPE=delegate requires DELEGATE_TARGET")?;
            let remote: Arc<dyn RateProvider> = Arc::new(RemoteRateProvider::new(target, config.http_retry_policy()));
            let (queue, rx) = JobQueue::bounded(config.chan_queue_size, config.chan_enqueue_timeout);
            let service = Arc::new(base.with_dispatcher(Arc::new(queue)));
            let worker = spawn_delegate_worker(
                service.clone(),
                remote,
                rx,
                config.job_timeout,
                config.worker_batch_limit,
                token.child_token(),
            );
            Ok(Runtime {
                service,
                workers: vec![worker],
            })
        }
    }
}

/// Components for the worker process: the poller in `db` mode, and always
/// a service that can answer remote fetches for delegate drivers elsewhere.
pub async fn build_worker(config: &Config, token: &CancellationToken) -> anyhow::Result<Runtime> {
    let stores = build_stores(config).await?;
    let provider = build_provider(config)?;
    // The worker takes no intake, so nothing is ever reserved.
    let service = Arc::new(build_service(config, &stores, Arc::new(NoopIdempotency), provider));

    let workers = match config.worker_type {
        WorkerType::Db => {
            vec![spawn_poller(service.clone(), PollerConfig::from(config), token.child_token())]
        }
        other => {
            info!(worker_type = ?other, "driver runs in the api process; serving remote fetches only");
            Vec::new()
        }
    };

    Ok(Runtime { service, workers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxrates_core::QuoteUpdateStatus;

    #[tokio::test]
    async fn memory_config_builds_without_external_services() {
        let config = Config {
            id_style: IdStyle::Sequential,
            worker_type: WorkerType::Chan,
            ..Config::default()
        };
        let token = CancellationToken::new();
        let runtime = build_api(&config, &token).await.unwrap();
        assert_eq!(runtime.workers.len(), 1);

        let id = runtime.service.request_quote_update("EUR/USD", "k").await.unwrap();
        assert_eq!(id.as_str(), "update-1");

        runtime.shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn default_config_processes_submitted_jobs() {
        let token = CancellationToken::new();
        let runtime = build_api(&Config::default(), &token).await.unwrap();
        assert_eq!(runtime.workers.len(), 1);
        assert_eq!(runtime.workers[0].name(), "poller");

        let id = runtime.service.request_quote_update("EUR/USD", "k1").await.unwrap();
        let mut status = None;
        for _ in 0..100 {
            let job = runtime.service.get_quote_update(id.as_str()).await.unwrap();
            status = Some(job.status);
            if job.status == QuoteUpdateStatus::Done {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(status, Some(QuoteUpdateStatus::Done));

        let last = runtime.service.get_last_quote("EUR/USD").await.unwrap();
        assert_eq!(last.price, Config::default().fake_price);

        runtime.shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn worker_in_db_mode_runs_the_poller() {
        let token = CancellationToken::new();
        let runtime = build_worker(&Config::default(), &token).await.unwrap();
        assert_eq!(runtime.workers.len(), 1);
        assert_eq!(runtime.workers[0].name(), "poller");
        runtime.shutdown(std::time::Duration::from_secs(1)).await;
    }
}
