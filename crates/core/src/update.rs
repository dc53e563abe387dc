//! Quote-update jobs and their lifecycle.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::QuoteUpdateId;
use crate::pair::Pair;

/// Job status. Lifecycle is `queued -> processing -> {done | failed}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteUpdateStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl QuoteUpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteUpdateStatus::Queued => "queued",
            QuoteUpdateStatus::Processing => "processing",
            QuoteUpdateStatus::Done => "done",
            QuoteUpdateStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QuoteUpdateStatus::Done | QuoteUpdateStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    ///
    /// A job must be claimed (`processing`) before it can finish, and nothing
    /// leaves a terminal status.
    pub fn can_transition_to(&self, next: QuoteUpdateStatus) -> bool {
        use QuoteUpdateStatus::*;
        matches!(
            (self, next),
            (Queued, Processing) | (Processing, Done) | (Processing, Failed)
        )
    }
}

impl core::fmt::Display for QuoteUpdateStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteUpdateStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QuoteUpdateStatus::Queued),
            "processing" => Ok(QuoteUpdateStatus::Processing),
            "done" => Ok(QuoteUpdateStatus::Done),
            "failed" => Ok(QuoteUpdateStatus::Failed),
            other => Err(DomainError::validation(format!("unknown status: {other}"))),
        }
    }
}

/// A requested status change, carrying the data the target status needs.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Processing { at: DateTime<Utc> },
    Done { price: f64, at: DateTime<Utc> },
    Failed { error: String, at: DateTime<Utc> },
}

impl StatusChange {
    pub fn target(&self) -> QuoteUpdateStatus {
        match self {
            StatusChange::Processing { .. } => QuoteUpdateStatus::Processing,
            StatusChange::Done { .. } => QuoteUpdateStatus::Done,
            StatusChange::Failed { .. } => QuoteUpdateStatus::Failed,
        }
    }
}

/// A quote refresh job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteUpdate {
    pub id: QuoteUpdateId,
    pub pair: Pair,
    pub status: QuoteUpdateStatus,
    pub error: Option<String>,
    pub price: Option<f64>,
    pub requested_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QuoteUpdate {
    pub fn queued(id: QuoteUpdateId, pair: Pair, requested_at: DateTime<Utc>) -> Self {
        Self {
            id,
            pair,
            status: QuoteUpdateStatus::Queued,
            error: None,
            price: None,
            requested_at,
            claimed_at: None,
            completed_at: None,
        }
    }

    /// `completed_at` once terminal, `requested_at` before that.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.requested_at)
    }

    /// Apply a status change, rejecting edges outside the lifecycle.
    pub fn apply(&mut self, change: StatusChange) -> DomainResult<()> {
        let to = change.target();
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        match change {
            StatusChange::Processing { at } => {
                self.claimed_at = Some(at);
            }
            StatusChange::Done { price, at } => {
                self.price = Some(price);
                self.error = None;
                self.completed_at = Some(at);
            }
            StatusChange::Failed { error, at } => {
                self.error = Some(error);
                self.completed_at = Some(at);
            }
        }
        self.status = to;
        Ok(())
    }
}
