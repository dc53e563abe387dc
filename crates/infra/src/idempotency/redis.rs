//! Redis-backed gate: `SET key 1 NX PX ttl`.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use async_trait::async_trait;
use tracing::{instrument, warn};

use super::{IdempotencyError, IdempotencyGate};

/// Default key namespace.
const DEFAULT_KEY_PREFIX: &str = "fxrates:idem:";

#[derive(Clone)]
pub struct RedisIdempotency {
    conn: MultiplexedConnection,
    ttl: Duration,
    prefix: String,
}

impl RedisIdempotency {
    /// Connect to Redis and build a gate with the given TTL.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, IdempotencyError> {
        let client = ::redis::Client::open(redis_url)
            .map_err(|e| IdempotencyError::Unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| IdempotencyError::Unavailable(e.to_string()))?;

        Ok(Self {
            conn,
            ttl,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl core::fmt::Debug for RedisIdempotency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisIdempotency")
            .field("ttl", &self.ttl)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdempotencyGate for RedisIdempotency {
    #[instrument(skip(self, key), err)]
    async fn try_reserve(&self, key: &str) -> Result<bool, IdempotencyError> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        // Replies "OK" when set, nil when the key already exists.
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(format!("{}{}", self.prefix, key))
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(error = %e, "idempotency reservation failed");
                IdempotencyError::Unavailable(e.to_string())
            })?;

        Ok(reply.is_some())
    }
}
