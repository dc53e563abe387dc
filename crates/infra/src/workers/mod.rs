//! Background drivers for the quote update pipeline.
//!
//! - `poller`: claims batches of queued jobs on an interval
//! - `channel`: consumes jobs dispatched in-process at intake
//! - `delegate`: like `channel`, but fetches from a remote process
//!
//! Every driver runs under a `CancellationToken` and is returned as a
//! `WorkerHandle`. Nothing is detached.

pub mod channel;
pub mod delegate;
pub mod poller;
pub mod queue;

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use channel::spawn_channel_worker;
pub use delegate::spawn_delegate_worker;
pub use poller::{PollerConfig, spawn_poller};
pub use queue::{DispatchError, DispatchedJob, JobDispatcher, JobQueue};

/// Handle to stop and join a background driver.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn<F>(name: &'static str, token: CancellationToken, driver: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(worker = name, "worker_started");
        Self {
            name,
            token,
            join: tokio::spawn(driver),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the driver and wait up to `grace` for it to drain.
    ///
    /// Returns `true` on a clean stop. On timeout the task is aborted.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let WorkerHandle { name, token, mut join } = self;
        token.cancel();

        match tokio::time::timeout(grace, &mut join).await {
            Ok(Ok(())) => {
                info!(worker = name, "worker_stopped");
                true
            }
            Ok(Err(err)) => {
                warn!(worker = name, error = %err, "worker_panicked");
                false
            }
            Err(_) => {
                warn!(worker = name, grace_ms = grace.as_millis() as u64, "worker_shutdown_timed_out");
                join.abort();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_joins_cooperative_driver() {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = WorkerHandle::spawn("test", token, async move {
            child.cancelled().await;
        });

        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_stuck_driver() {
        let handle = WorkerHandle::spawn("stuck", CancellationToken::new(), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(!handle.is_finished());

        assert!(!handle.shutdown(Duration::from_millis(10)).await);
    }
}
