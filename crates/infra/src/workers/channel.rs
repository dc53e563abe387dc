//! In-process channel driver: one consumer, local provider.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fxrates_core::QuoteSource;

use super::WorkerHandle;
use super::queue::DispatchedJob;
use crate::jobs::ClaimedJob;
use crate::service::FxRatesService;

/// Consume dispatched jobs until cancelled or the queue closes.
///
/// Jobs are processed one at a time; a job already in progress when the
/// token fires is finished before the loop exits.
pub fn spawn_channel_worker(
    service: Arc<FxRatesService>,
    rx: mpsc::Receiver<DispatchedJob>,
    job_timeout: Duration,
    token: CancellationToken,
) -> WorkerHandle {
    let driver = run(service, rx, job_timeout, token.clone());
    WorkerHandle::spawn("channel", token, driver)
}

async fn run(
    service: Arc<FxRatesService>,
    mut rx: mpsc::Receiver<DispatchedJob>,
    job_timeout: Duration,
    token: CancellationToken,
) {
    let provider = service.provider();

    loop {
        let job = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            job = rx.recv() => match job {
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

        let claimed = ClaimedJob {
            id: job.id,
            pair: job.pair,
        };
        if let Err(err) = service
            .run_claimed(&claimed, QuoteSource::Channel, provider.as_ref(), job_timeout)
            .await
        {
            warn!(update_id = %claimed.id, error = %err, "channel_job_failed");
        }
    }
}
