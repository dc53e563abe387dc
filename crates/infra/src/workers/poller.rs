//! Interval poller: sweep stale claims, claim a batch, run each job in its own task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fxrates_core::QuoteSource;

use super::WorkerHandle;
use crate::config::Config;
use crate::service::FxRatesService;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub batch_limit: usize,
    pub job_timeout: Duration,
    /// `None` disables the stale-claim sweep.
    pub lease: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            batch_limit: 10,
            job_timeout: Duration::from_secs(5),
            lease: None,
        }
    }
}

impl From<&Config> for PollerConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.worker_poll_interval,
            batch_limit: config.worker_batch_limit,
            job_timeout: config.job_timeout,
            lease: config.claim_lease,
        }
    }
}

pub fn spawn_poller(service: Arc<FxRatesService>, config: PollerConfig, token: CancellationToken) -> WorkerHandle {
    let driver = run(service, config, token.clone());
    WorkerHandle::spawn("poller", token, driver)
}

async fn run(service: Arc<FxRatesService>, config: PollerConfig, token: CancellationToken) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        while let Some(done) = in_flight.try_join_next() {
            if let Err(err) = done {
                warn!(error = %err, "poller_job_panicked");
            }
        }

        if let Some(lease) = config.lease {
            if let Err(err) = service.sweep_stale(lease).await {
                warn!(error = %err, "lease_sweep_failed");
            }
        }

        let free = config.batch_limit.saturating_sub(in_flight.len());
        if free == 0 {
            continue;
        }

        let claimed = match service.claim_batch(free).await {
            Ok(claimed) => claimed,
            Err(err) => {
                warn!(error = %err, "claim_failed");
                continue;
            }
        };
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed_batch");
        }

        for job in claimed {
            let service = service.clone();
            let timeout = config.job_timeout;
            in_flight.spawn(async move {
                let provider = service.provider();
                if let Err(err) = service
                    .run_claimed(&job, QuoteSource::Poller, provider.as_ref(), timeout)
                    .await
                {
                    warn!(update_id = %job.id, error = %err, "poller_job_failed");
                }
            });
        }
    }

    while let Some(done) = in_flight.join_next().await {
        if let Err(err) = done {
            warn!(error = %err, "poller_job_panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::OrderedCompletionUnit;
    use crate::idempotency::NoopIdempotency;
    use crate::jobs::{InMemoryJobStore, JobStore};
    use crate::provider::FixedRateProvider;
    use crate::quotes::{InMemoryQuoteStore, QuoteStore};
    use fxrates_core::{Pair, QuoteUpdateStatus};

    #[tokio::test]
    async fn poller_completes_queued_jobs_and_drains_on_shutdown() {
        let jobs = InMemoryJobStore::arc();
        let quotes = InMemoryQuoteStore::arc();
        let service = Arc::new(FxRatesService::new(
            jobs.clone(),
            quotes.clone(),
            Arc::new(NoopIdempotency),
            Arc::new(FixedRateProvider::new(1.5)),
            Arc::new(OrderedCompletionUnit::new(jobs.clone(), quotes.clone())),
        ));

        let pair = Pair::parse("USD/MXN").unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(jobs.create_queued(pair).await.unwrap());
        }

        let config = PollerConfig {
            interval: Duration::from_millis(5),
            ..PollerConfig::default()
        };
        let handle = spawn_poller(service, config, CancellationToken::new());

        for _ in 0..200 {
            let mut done = 0;
            for id in &ids {
                if jobs.get(id).await.unwrap().unwrap().status == QuoteUpdateStatus::Done {
                    done += 1;
                }
            }
            if done == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(handle.shutdown(Duration::from_secs(1)).await);
        for id in &ids {
            assert_eq!(jobs.get(id).await.unwrap().unwrap().status, QuoteUpdateStatus::Done);
        }
        assert_eq!(quotes.get_last(pair).await.unwrap().unwrap().price, 1.5);
    }
}
