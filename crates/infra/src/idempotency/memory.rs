//! In-process TTL map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{IdempotencyError, IdempotencyGate};

/// Monotonic time source; injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Keys live in a map until their TTL passes. Expired keys are evicted lazily
/// on the next reservation.
pub struct InMemoryIdempotency {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    keys: Mutex<HashMap<String, Instant>>,
}

impl InMemoryIdempotency {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            keys: Mutex::new(HashMap::new()),
        }
    }
}

impl core::fmt::Debug for InMemoryIdempotency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryIdempotency")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdempotencyGate for InMemoryIdempotency {
    async fn try_reserve(&self, key: &str) -> Result<bool, IdempotencyError> {
        let now = self.clock.now();
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| IdempotencyError::Unavailable("idempotency map lock poisoned".to_string()))?;

        keys.retain(|_, expires_at| *expires_at > now);
        if keys.contains_key(key) {
            return Ok(false);
        }
        keys.insert(key.to_string(), now + self.ttl);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ManualClock(Mutex<Instant>);

    impl ManualClock {
        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn first_reservation_wins() {
        let gate = InMemoryIdempotency::new(Duration::from_secs(60));
        assert!(gate.try_reserve("k1").await.unwrap());
        assert!(!gate.try_reserve("k1").await.unwrap());
        assert!(gate.try_reserve("k2").await.unwrap());
    }

    #[tokio::test]
    async fn keys_expire_after_ttl() {
        let clock = Arc::new(ManualClock(Mutex::new(Instant::now())));
        let gate = InMemoryIdempotency::with_clock(Duration::from_secs(10), clock.clone());

        assert!(gate.try_reserve("k1").await.unwrap());
        clock.advance(Duration::from_secs(9));
        assert!(!gate.try_reserve("k1").await.unwrap());

        clock.advance(Duration::from_secs(2));
        assert!(gate.try_reserve("k1").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_reservations_admit_exactly_one() {
        let gate = Arc::new(InMemoryIdempotency::new(Duration::from_secs(60)));
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let gate = gate.clone();
            tasks.spawn(async move { gate.try_reserve("same").await.unwrap() });
        }

        let mut winners = 0;
        while let Some(won) = tasks.join_next().await {
            if won.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
