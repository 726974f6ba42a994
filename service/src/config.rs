//! Transfer service configuration.

use std::str::FromStr;
use std::time::Duration;

use simplebank_ledger::{Backoff, IsolationLevel, PgStoreConfig, RetryPolicy, TransferPolicy};

/// Delay strategy between conflict retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    None,
    Fixed,
    Exponential,
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(BackoffKind::None),
            "fixed" => Ok(BackoffKind::Fixed),
            "exponential" => Ok(BackoffKind::Exponential),
            other => Err(format!("unknown backoff strategy: {}", other)),
        }
    }
}

/// Ledger store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Isolation level of every unit of work.
    pub isolation: IsolationLevel,
    /// Per-transaction row lock wait limit.
    pub lock_timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::RepeatableRead,
            lock_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl StoreConfig {
    /// Build the PostgreSQL store configuration.
    pub fn pg_config(&self) -> PgStoreConfig {
        PgStoreConfig {
            isolation: self.isolation,
            lock_timeout: self.lock_timeout,
        }
    }
}

/// Conflict retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per transfer, first one included.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub backoff: BackoffKind,
    /// First delay (fixed delay for `Fixed`).
    pub initial_delay: Duration,
    /// Delay cap for `Exponential`.
    pub max_delay: Duration,
    /// Randomize delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffKind::Exponential,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Build the retry policy.
    pub fn policy(&self) -> RetryPolicy {
        let backoff = match self.backoff {
            BackoffKind::None => Backoff::None,
            BackoffKind::Fixed => Backoff::Fixed(self.initial_delay),
            BackoffKind::Exponential => Backoff::Exponential {
                initial: self.initial_delay,
                max: self.max_delay,
            },
        };
        RetryPolicy::new(self.max_attempts, backoff).with_jitter(self.jitter)
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Database URL.
    pub database_url: String,
    /// Connection pool size.
    pub max_connections: u32,
    /// Store configuration.
    pub store: StoreConfig,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Transfer policy.
    pub policy: TransferPolicy,
    /// Deadline for one transfer request, retries included.
    pub request_timeout: Duration,
    /// Maximum time `stop` waits for in-flight transfers.
    pub drain_timeout: Duration,
    /// Log level.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/simplebank".to_string(),
            max_connections: 10,
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
            policy: TransferPolicy::default(),
            request_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let millis = |key: &str| {
            parse(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(max) = parse("DATABASE_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            config.max_connections = max;
        }

        if let Some(isolation) = parse("LEDGER_ISOLATION").and_then(|v| v.parse().ok()) {
            config.store.isolation = isolation;
        }
        if let Some(timeout) = millis("LEDGER_LOCK_TIMEOUT_MS") {
            config.store.lock_timeout = (!timeout.is_zero()).then_some(timeout);
        }

        if let Some(attempts) = parse("TRANSFER_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            config.retry.max_attempts = attempts;
        }
        if let Some(backoff) = parse("TRANSFER_BACKOFF").and_then(|v| v.parse().ok()) {
            config.retry.backoff = backoff;
        }
        if let Some(initial) = millis("TRANSFER_BACKOFF_INITIAL_MS") {
            config.retry.initial_delay = initial;
        }
        if let Some(max) = millis("TRANSFER_BACKOFF_MAX_MS") {
            config.retry.max_delay = max;
        }

        if let Some(allow) = parse("TRANSFER_ALLOW_OVERDRAFT").and_then(|v| v.parse().ok()) {
            config.policy.allow_overdraft = allow;
        }
        if let Some(allow) = parse("TRANSFER_ALLOW_SELF").and_then(|v| v.parse().ok()) {
            config.policy.allow_self_transfer = allow;
        }
        if let Some(timeout) = millis("TRANSFER_TIMEOUT_MS") {
            config.request_timeout = timeout;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            return Err("Max connections cannot be 0".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("Max attempts cannot be 0".to_string());
        }

        if self.retry.backoff == BackoffKind::Exponential
            && self.retry.initial_delay > self.retry.max_delay
        {
            return Err("Initial backoff delay cannot exceed max delay".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("Request timeout cannot be 0".to_string());
        }

        if self.drain_timeout.is_zero() {
            return Err("Drain timeout cannot be 0".to_string());
        }

        Ok(())
    }
}
