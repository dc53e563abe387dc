//! Idempotency gates for request intake.
//!
//! `try_reserve(key)` returns `true` exactly once per key within the TTL. A store
//! failure is an error, never a guess in either direction.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::{Clock, InMemoryIdempotency, SystemClock};
#[cfg(feature = "redis")]
pub use self::redis::RedisIdempotency;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdempotencyError {
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdempotencyGate: Send + Sync {
    /// Reserve `key`. `Ok(false)` means it was already reserved.
    async fn try_reserve(&self, key: &str) -> Result<bool, IdempotencyError>;
}

#[async_trait]
impl<T: IdempotencyGate + ?Sized> IdempotencyGate for Arc<T> {
    async fn try_reserve(&self, key: &str) -> Result<bool, IdempotencyError> {
        (**self).try_reserve(key).await
    }
}

/// Accepts every key. For local runs without deduplication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIdempotency;

#[async_trait]
impl IdempotencyGate for NoopIdempotency {
    async fn try_reserve(&self, _key: &str) -> Result<bool, IdempotencyError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_always_reserves() {
        let gate = NoopIdempotency;
        assert!(gate.try_reserve("k1").await.unwrap());
        assert!(gate.try_reserve("k1").await.unwrap());
    }
}
