//! Delegate driver: claims locally, fetches from a remote process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fxrates_core::QuoteSource;

use super::WorkerHandle;
use super::queue::DispatchedJob;
use crate::jobs::ClaimedJob;
use crate::provider::RateProvider;
use crate::service::FxRatesService;

/// Consume dispatched jobs and complete each in its own task, fetching
/// through `remote`. At most `max_in_flight` completions run at once; while
/// at the cap nothing is received, so the queue fills and intake sheds load.
/// In-flight completions are drained on cancellation.
pub fn spawn_delegate_worker(
    service: Arc<FxRatesService>,
    remote: Arc<dyn RateProvider>,
    rx: mpsc::Receiver<DispatchedJob>,
    job_timeout: Duration,
    max_in_flight: usize,
    token: CancellationToken,
) -> WorkerHandle {
    let driver = run(service, remote, rx, job_timeout, max_in_flight.max(1), token.clone());
    WorkerHandle::spawn("delegate", token, driver)
}

async fn run(
    service: Arc<FxRatesService>,
    remote: Arc<dyn RateProvider>,
    mut rx: mpsc::Receiver<DispatchedJob>,
    job_timeout: Duration,
    max_in_flight: usize,
    token: CancellationToken,
) {
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        let job = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(err) = done {
                    warn!(error = %err, "delegate_job_panicked");
                }
                continue;
            }
            job = rx.recv(), if in_flight.len() < max_in_flight => match job {
                Some(job) => job,
                None => break,
            },
        };

        match service.claim(&job.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(update_id = %job.id, "already claimed");
                continue;
            }
            Err(err) => {
                warn!(update_id = %job.id, error = %err, "claim_failed");
                continue;
            }
        }

        let service = service.clone();
        let remote = remote.clone();
        in_flight.spawn(async move {
            let claimed = ClaimedJob {
                id: job.id,
                pair: job.pair,
            };
            if let Err(err) = service
                .run_claimed(&claimed, QuoteSource::Delegate, remote.as_ref(), job_timeout)
                .await
            {
                warn!(update_id = %claimed.id, error = %err, "delegate_job_failed");
            }
        });
    }

    while let Some(done) = in_flight.join_next().await {
        if let Err(err) = done {
            warn!(error = %err, "delegate_job_panicked");
        }
    }
}
