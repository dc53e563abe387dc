//! Bounded in-process job queue used by the channel and delegate drivers.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use fxrates_core::{Pair, QuoteUpdateId};

/// A freshly created job handed to a driver. Not claimed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedJob {
    pub id: QuoteUpdateId,
    pub pair: Pair,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch queue full")]
    QueueFull,
    #[error("dispatch queue closed")]
    Closed,
}

/// Accepts new jobs at intake.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: DispatchedJob) -> Result<(), DispatchError>;
}

/// Sending half of a bounded `mpsc` queue.
///
/// `dispatch` waits at most `enqueue_timeout` for a free slot.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<DispatchedJob>,
    enqueue_timeout: Duration,
}

impl JobQueue {
    pub fn bounded(capacity: usize, enqueue_timeout: Duration) -> (Self, mpsc::Receiver<DispatchedJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, enqueue_timeout }, rx)
    }
}

#[async_trait]
impl JobDispatcher for JobQueue {
    async fn dispatch(&self, job: DispatchedJob) -> Result<(), DispatchError> {
        self.tx
            .send_timeout(job, self.enqueue_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DispatchError::QueueFull,
                SendTimeoutError::Closed(_) => DispatchError::Closed,
            })
    }
}
