//! Quote update identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a quote update job.
///
/// Opaque to callers. Generated ids are UUIDv7 strings; stores may also hand
/// out sequential ids (`update-1`, `update-2`, ...) for local runs and tests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteUpdateId(String);

impl QuoteUpdateId {
    /// Create a new time-ordered identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Sequential identifier with the given prefix, e.g. `update-3`.
    pub fn sequential(prefix: &str, n: u64) -> Self {
        Self(format!("{prefix}-{n}"))
    }

    /// Wrap an id read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QuoteUpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for QuoteUpdateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for QuoteUpdateId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("QuoteUpdateId: empty"));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<QuoteUpdateId> for String {
    fn from(value: QuoteUpdateId) -> Self {
        value.0
    }
}
