//! Process configuration loaded from environment variables.
//!
//! `Config` is read once in `main` and passed down; nothing else reads the
//! environment.

use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which worker driver the worker binary runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerType {
    /// Ticking poller over the job store.
    Db,
    /// In-process bounded channel.
    Chan,
    /// Channel consumer that fetches through a remote process.
    Delegate,
}

impl FromStr for WorkerType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "db" => Ok(WorkerType::Db),
            "chan" => Ok(WorkerType::Chan),
            "delegate" => Ok(WorkerType::Delegate),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Fake,
    ExchangeRatesApi,
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fake" => Ok(ProviderKind::Fake),
            "exchangeratesapi" => Ok(ProviderKind::ExchangeRatesApi),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyKind {
    Redis,
    Memory,
    Noop,
}

impl FromStr for IdempotencyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redis" => Ok(IdempotencyKind::Redis),
            "memory" => Ok(IdempotencyKind::Memory),
            "noop" => Ok(IdempotencyKind::Noop),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    Pg,
}

impl FromStr for StorageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StorageKind::Memory),
            "pg" => Ok(StorageKind::Pg),
            _ => Err(()),
        }
    }
}

/// How new job ids are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStyle {
    /// UUIDv7 strings.
    Uuid,
    /// `update-1`, `update-2`, ... (tests and local runs).
    Sequential,
}

impl FromStr for IdStyle {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uuid" => Ok(IdStyle::Uuid),
            "sequential" => Ok(IdStyle::Sequential),
            _ => Err(()),
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub env: String,
    pub log_level: String,
    pub port: u16,

    pub storage: StorageKind,
    pub database_url: Option<String>,
    pub pg_max_conns: u32,
    pub id_style: IdStyle,

    pub provider: ProviderKind,
    pub fake_price: f64,
    pub exchange_api_base: Option<String>,
    pub exchange_api_key: Option<String>,
    pub http_backoff_initial: Duration,
    pub http_backoff_max: Duration,
    pub http_max_attempts: u32,

    pub worker_type: WorkerType,
    pub worker_poll_interval: Duration,
    pub worker_batch_limit: usize,
    pub job_timeout: Duration,
    /// `None` disables the stale-claim sweep.
    pub claim_lease: Option<Duration>,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,

    pub idempotency: IdempotencyKind,
    pub redis_url: Option<String>,
    pub idempotency_ttl: Duration,

    pub chan_queue_size: usize,
    pub chan_enqueue_timeout: Duration,
    pub delegate_target: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: "local".to_string(),
            log_level: "info".to_string(),
            port: 8080,
            storage: StorageKind::Memory,
            database_url: None,
            pg_max_conns: 5,
            id_style: IdStyle::Uuid,
            provider: ProviderKind::Fake,
            fake_price: 1.2345,
            exchange_api_base: None,
            exchange_api_key: None,
            http_backoff_initial: Duration::from_millis(200),
            http_backoff_max: Duration::from_millis(1000),
            http_max_attempts: 3,
            worker_type: WorkerType::Db,
            worker_poll_interval: Duration::from_millis(250),
            worker_batch_limit: 10,
            job_timeout: Duration::from_millis(5000),
            claim_lease: None,
            request_timeout: Duration::from_millis(3000),
            shutdown_timeout: Duration::from_millis(10_000),
            idempotency: IdempotencyKind::Memory,
            redis_url: None,
            idempotency_ttl: Duration::from_millis(86_400_000),
            chan_queue_size: 100,
            chan_enqueue_timeout: Duration::from_millis(50),
            delegate_target: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(v) = get("ENV") {
            config.env = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = get("PORT") {
            config.port = parse("PORT", &v)?;
        }

        config.database_url = get("DATABASE_URL");
        config.storage = match get("STORAGE") {
            Some(v) => parse("STORAGE", &v)?,
            None if config.database_url.is_some() => StorageKind::Pg,
            None => StorageKind::Memory,
        };
        if let Some(v) = get("PG_MAX_CONNS") {
            config.pg_max_conns = parse("PG_MAX_CONNS", &v)?;
        }
        if let Some(v) = get("ID_STYLE") {
            config.id_style = parse("ID_STYLE", &v)?;
        }

        if let Some(v) = get("PROVIDER") {
            config.provider = parse("PROVIDER", &v)?;
        }
        if let Some(v) = get("FAKE_PRICE") {
            config.fake_price = parse("FAKE_PRICE", &v)?;
        }
        config.exchange_api_base = get("EXCHANGE_API_BASE");
        config.exchange_api_key = get("EXCHANGE_API_KEY");
        if let Some(v) = get("HTTP_BACKOFF_INITIAL_MS") {
            config.http_backoff_initial = millis("HTTP_BACKOFF_INITIAL_MS", &v)?;
        }
        if let Some(v) = get("HTTP_BACKOFF_MAX_MS") {
            config.http_backoff_max = millis("HTTP_BACKOFF_MAX_MS", &v)?;
        }
        if let Some(v) = get("HTTP_MAX_ATTEMPTS") {
            config.http_max_attempts = parse("HTTP_MAX_ATTEMPTS", &v)?;
        }

        if let Some(v) = get("WORKER_TYPE") {
            config.worker_type = parse("WORKER_TYPE", &v)?;
        }
        if let Some(v) = get("WORKER_POLL_MS") {
            config.worker_poll_interval = millis("WORKER_POLL_MS", &v)?;
        }
        if let Some(v) = get("WORKER_BATCH_LIMIT") {
            config.worker_batch_limit = parse("WORKER_BATCH_LIMIT", &v)?;
        }
        if let Some(v) = get("JOB_TIMEOUT_MS") {
            config.job_timeout = millis("JOB_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("CLAIM_LEASE_MS") {
            let lease = millis("CLAIM_LEASE_MS", &v)?;
            config.claim_lease = (!lease.is_zero()).then_some(lease);
        }
        if let Some(v) = get("REQUEST_TIMEOUT_MS") {
            config.request_timeout = millis("REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("SHUTDOWN_TIMEOUT_MS") {
            config.shutdown_timeout = millis("SHUTDOWN_TIMEOUT_MS", &v)?;
        }

        if let Some(v) = get("IDEMPOTENCY") {
            config.idempotency = parse("IDEMPOTENCY", &v)?;
        }
        config.redis_url = get("REDIS_URL");
        if let Some(v) = get("IDEMPOTENCY_TTL_MS") {
            config.idempotency_ttl = millis("IDEMPOTENCY_TTL_MS", &v)?;
        }

        if let Some(v) = get("CHAN_QUEUE_SIZE") {
            config.chan_queue_size = parse("CHAN_QUEUE_SIZE", &v)?;
        }
        if let Some(v) = get("CHAN_ENQUEUE_TIMEOUT_MS") {
            config.chan_enqueue_timeout = millis("CHAN_ENQUEUE_TIMEOUT_MS", &v)?;
        }
        config.delegate_target = get("DELEGATE_TARGET");

        Ok(config)
    }

    /// Reject inconsistent combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage == StorageKind::Pg && self.database_url.is_none() {
            return Err(ConfigError::Invalid("STORAGE=pg requires DATABASE_URL".to_string()));
        }
        if self.idempotency == IdempotencyKind::Redis && self.redis_url.is_none() {
            return Err(ConfigError::Invalid("IDEMPOTENCY=redis requires REDIS_URL".to_string()));
        }
        if self.provider == ProviderKind::ExchangeRatesApi
            && (self.exchange_api_base.is_none() || self.exchange_api_key.is_none())
        {
            return Err(ConfigError::Invalid(
                "PROVIDER=exchangeratesapi requires EXCHANGE_API_BASE and EXCHANGE_API_KEY".to_string(),
            ));
        }
        if self.worker_type == WorkerType::Delegate && self.delegate_target.is_none() {
            return Err(ConfigError::Invalid(
                "WORKER_TYPE=delegate requires DELEGATE_TARGET".to_string(),
            ));
        }
        if self.worker_batch_limit == 0 {
            return Err(ConfigError::Invalid("WORKER_BATCH_LIMIT must be positive".to_string()));
        }
        if self.chan_queue_size == 0 {
            return Err(ConfigError::Invalid("CHAN_QUEUE_SIZE must be positive".to_string()));
        }
        if self.http_max_attempts == 0 {
            return Err(ConfigError::Invalid("HTTP_MAX_ATTEMPTS must be positive".to_string()));
        }
        if self.worker_poll_interval.is_zero() {
            return Err(ConfigError::Invalid("WORKER_POLL_MS must be positive".to_string()));
        }
        if !(self.fake_price.is_finite() && self.fake_price > 0.0) {
            return Err(ConfigError::Invalid("FAKE_PRICE must be a positive number".to_string()));
        }
        Ok(())
    }

    /// Backoff policy for outbound HTTP calls.
    pub fn http_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.http_max_attempts,
            self.http_backoff_initial,
            self.http_backoff_max,
        )
    }

    /// Backoff policy for retrying completion writes.
    pub fn persist_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(3, Duration::from_millis(50), Duration::from_millis(500))
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(key, value).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_are_valid() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.worker_type, WorkerType::Db);
        assert_eq!(config.worker_batch_limit, 10);
        assert_eq!(config.claim_lease, None);
        assert_eq!(config.idempotency_ttl, Duration::from_secs(86_400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn database_url_implies_pg_storage() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/fx")]).unwrap();
        assert_eq!(config.storage, StorageKind::Pg);

        let config = load(&[("DATABASE_URL", "postgres://localhost/fx"), ("STORAGE", "memory")]).unwrap();
        assert_eq!(config.storage, StorageKind::Memory);
    }

    #[test]
    fn lease_zero_means_disabled() {
        assert_eq!(load(&[("CLAIM_LEASE_MS", "0")]).unwrap().claim_lease, None);
        assert_eq!(
            load(&[("CLAIM_LEASE_MS", "1500")]).unwrap().claim_lease,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn unparsable_values_are_reported() {
        let err = load(&[("WORKER_POLL_MS", "soon")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "WORKER_POLL_MS",
                value: "soon".to_string()
            }
        );
        assert!(load(&[("WORKER_TYPE", "cron")]).is_err());
    }

    #[test]
    fn validate_rejects_inconsistent_combinations() {
        let delegate = load(&[("WORKER_TYPE", "delegate")]).unwrap();
        assert!(delegate.validate().is_err());

        let pg = load(&[("STORAGE", "pg")]).unwrap();
        assert!(pg.validate().is_err());

        let xr = load(&[("PROVIDER", "exchangeratesapi"), ("EXCHANGE_API_BASE", "http://x")]).unwrap();
        assert!(xr.validate().is_err());

        let redis = load(&[("IDEMPOTENCY", "redis")]).unwrap();
        assert!(redis.validate().is_err());
    }

    #[test]
    fn http_policy_follows_backoff_settings() {
        let config = load(&[
            ("HTTP_BACKOFF_INITIAL_MS", "10"),
            ("HTTP_BACKOFF_MAX_MS", "40"),
            ("HTTP_MAX_ATTEMPTS", "4"),
        ])
        .unwrap();
        let policy = config.http_retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.max_delay, Duration::from_millis(40));
    }
}
