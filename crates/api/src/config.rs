//! API configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `MERCATO_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `MERCATO_HOST` - Bind address (default: 127.0.0.1)
//! - `MERCATO_PORT` - Listen port (default: 3000)
//! - `PG_BASE_URL` - Payment gateway base URL (default: <http://localhost:8082>)
//! - `PG_USER_ID` - Merchant id sent as `X-USER-ID` (default: 135135)
//! - `PG_CALLBACK_URL` - Default callback target for payment results
//! - `PG_CONNECT_TIMEOUT_MS` / `PG_READ_TIMEOUT_MS` - Transport timeouts (default: 5000 / 10000)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_TRACES_SAMPLE_RATE` - Sentry traces sample rate (default: 0.1)
//!
//! ## Optional (gateway resilience, per operation)
//!
//! `{OP}` is `SUBMIT` for payment submission and `QUERY` for status lookups.
//!
//! - `PG_{OP}_CB_FAILURE_RATE_THRESHOLD` - Percent of failed calls that opens the breaker (default: 50)
//! - `PG_{OP}_CB_MINIMUM_CALLS` - Calls recorded before the failure rate is evaluated (default: 5)
//! - `PG_{OP}_CB_SLIDING_WINDOW_SIZE` - Calls kept in the window (default: 10)
//! - `PG_{OP}_CB_OPEN_COOLDOWN_MS` - Time spent open before probing (default: 5000)
//! - `PG_{OP}_CB_HALF_OPEN_CALLS` - Trial calls while half-open (default: 3)
//! - `PG_{OP}_RETRY_MAX_ATTEMPTS` - Attempts including the first (default: 3)
//! - `PG_{OP}_RETRY_BACKOFF_BASE_MS` - Delay before the second attempt (default: 500)
//! - `PG_{OP}_RETRY_BACKOFF_MULTIPLIER` - Backoff growth factor (default: 2)
//! - `PG_{OP}_TIMEOUT_MS` - Per-attempt timeout (default: 3000)
//! - `PG_{OP}_CANCEL_ON_TIMEOUT` - Abort the in-flight call on timeout (default: true)
//!
//! ## Optional (payment reconciliation)
//! - `PAYMENT_SCHEDULER_ENABLED` - Run background sweeps (default: true)
//! - `PAYMENT_RECOVERY_INTERVAL_MS` - Recovery sweep period (default: 300000)
//! - `PAYMENT_PENDING_STALENESS_MINUTES` - Age before a pending payment is re-queried (default: 30)
//! - `PAYMENT_ARCHIVAL_DAILY_AT` - UTC time of the daily archival sweep, `HH:MM` (default: 02:00)
//! - `PAYMENT_RETENTION_DAYS` - Age before a terminal payment is archived (default: 7)

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// API application configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Payment gateway client configuration
    pub gateway: GatewayConfig,
    /// Payment reconciliation configuration
    pub scheduler: SchedulerConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<SecretString>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Payment gateway client configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway base URL; requests go to `{base_url}/api/v1/payments`
    pub base_url: Url,
    /// Merchant id sent in the `X-USER-ID` header
    pub user_id: String,
    /// Callback target sent with each payment unless the caller supplies one
    pub callback_url: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Overall transport read timeout
    pub read_timeout: Duration,
    /// Resilience policy for payment submission
    pub submit: ResilienceConfig,
    /// Resilience policy for status queries
    pub query: ResilienceConfig,
}

/// Circuit breaker, retry, and timeout settings for one gateway operation.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub time_limiter: TimeLimiterConfig,
}

/// Count-based sliding window circuit breaker settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure percentage at or above which the breaker opens
    pub failure_rate_threshold: f32,
    /// Recorded calls required before the failure rate is evaluated
    pub minimum_calls: usize,
    /// Number of most recent calls kept in the window
    pub sliding_window_size: usize,
    /// How long the breaker stays open before allowing trial calls
    pub open_cooldown: Duration,
    /// Trial calls permitted while half-open
    pub half_open_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            minimum_calls: 5,
            sliding_window_size: 10,
            open_cooldown: Duration::from_secs(5),
            half_open_calls: 3,
        }
    }
}

/// Exponential backoff retry settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first call
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub backoff_base: Duration,
    /// Factor applied to the delay after each further attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

/// Per-attempt timeout settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimiterConfig {
    /// Wall-clock bound on a single attempt
    pub timeout: Duration,
    /// Abort the in-flight call when the bound is exceeded
    pub cancel_on_timeout: bool,
}

impl Default for TimeLimiterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            cancel_on_timeout: true,
        }
    }
}

/// Payment reconciliation scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Whether the background sweeps run at all
    pub enabled: bool,
    /// Period of the recovery sweep
    pub recovery_interval: Duration,
    /// Age after which a pending payment is re-queried
    pub pending_staleness: chrono::Duration,
    /// UTC wall-clock time of the daily archival sweep
    pub archival_daily_at: NaiveTime,
    /// Age after which a terminal payment is archived
    pub retention: chrono::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recovery_interval: Duration::from_secs(300),
            pending_staleness: chrono::Duration::minutes(30),
            archival_daily_at: NaiveTime::MIN + chrono::Duration::hours(2),
            retention: chrono::Duration::days(7),
        }
    }
}

impl ApiConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("MERCATO_DATABASE_URL")?;
        let host = parse_env("MERCATO_HOST", "127.0.0.1")?;
        let port = parse_env("MERCATO_PORT", "3000")?;
        let gateway = GatewayConfig::from_env()?;
        let scheduler = SchedulerConfig::from_env()?;
        let sentry_dsn = get_optional_env("SENTRY_DSN").map(SecretString::from);
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);

        Ok(Self {
            database_url,
            host,
            port,
            gateway,
            scheduler,
            sentry_dsn,
            sentry_environment,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl GatewayConfig {
    /// Load gateway settings from `PG_*` variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = parse_env("PG_BASE_URL", "http://localhost:8082")?;

        Ok(Self {
            base_url,
            user_id: get_env_or_default("PG_USER_ID", "135135"),
            callback_url: get_env_or_default(
                "PG_CALLBACK_URL",
                "http://localhost:3000/api/v1/payments/callback",
            ),
            connect_timeout: Duration::from_millis(parse_env("PG_CONNECT_TIMEOUT_MS", "5000")?),
            read_timeout: Duration::from_millis(parse_env("PG_READ_TIMEOUT_MS", "10000")?),
            submit: ResilienceConfig::from_env("PG_SUBMIT")?,
            query: ResilienceConfig::from_env("PG_QUERY")?,
        })
    }
}

impl ResilienceConfig {
    /// Load one operation's policy from variables named `{prefix}_*`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable is present but invalid.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, get_optional_env)
    }

    /// Load one operation's policy, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable is present but invalid.
    pub fn from_lookup(
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| format!("{prefix}_{name}");

        let circuit_breaker = CircuitBreakerConfig {
            failure_rate_threshold: parse_or(
                &lookup,
                &var("CB_FAILURE_RATE_THRESHOLD"),
                defaults.circuit_breaker.failure_rate_threshold,
            )?,
            minimum_calls: parse_or(
                &lookup,
                &var("CB_MINIMUM_CALLS"),
                defaults.circuit_breaker.minimum_calls,
            )?,
            sliding_window_size: parse_or(
                &lookup,
                &var("CB_SLIDING_WINDOW_SIZE"),
                defaults.circuit_breaker.sliding_window_size,
            )?,
            open_cooldown: parse_millis_or(
                &lookup,
                &var("CB_OPEN_COOLDOWN_MS"),
                defaults.circuit_breaker.open_cooldown,
            )?,
            half_open_calls: parse_or(
                &lookup,
                &var("CB_HALF_OPEN_CALLS"),
                defaults.circuit_breaker.half_open_calls,
            )?,
        };
        validate_circuit_breaker(prefix, &circuit_breaker)?;

        let retry = RetryConfig {
            max_attempts: parse_or(&lookup, &var("RETRY_MAX_ATTEMPTS"), defaults.retry.max_attempts)?,
            backoff_base: parse_millis_or(
                &lookup,
                &var("RETRY_BACKOFF_BASE_MS"),
                defaults.retry.backoff_base,
            )?,
            backoff_multiplier: parse_or(
                &lookup,
                &var("RETRY_BACKOFF_MULTIPLIER"),
                defaults.retry.backoff_multiplier,
            )?,
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                var("RETRY_MAX_ATTEMPTS"),
                "must be at least 1".to_string(),
            ));
        }

        let time_limiter = TimeLimiterConfig {
            timeout: parse_millis_or(&lookup, &var("TIMEOUT_MS"), defaults.time_limiter.timeout)?,
            cancel_on_timeout: parse_or(
                &lookup,
                &var("CANCEL_ON_TIMEOUT"),
                defaults.time_limiter.cancel_on_timeout,
            )?,
        };

        Ok(Self {
            circuit_breaker,
            retry,
            time_limiter,
        })
    }
}

impl SchedulerConfig {
    /// Longest accepted recovery period (one day).
    const MAX_RECOVERY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
    /// Longest accepted staleness threshold (one year).
    const MAX_STALENESS_MINUTES: i64 = 365 * 24 * 60;
    /// Longest accepted retention window (ten years).
    const MAX_RETENTION_DAYS: i64 = 10 * 365;

    /// Load scheduler settings from `PAYMENT_*` variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(get_optional_env)
    }

    /// Load scheduler settings, reading variables through `lookup`.
    ///
    /// The recovery interval must be non-zero and at most a day. Staleness
    /// and retention must be positive and bounded so that cut-off arithmetic
    /// on the current time cannot overflow.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let archival_daily_at = match lookup("PAYMENT_ARCHIVAL_DAILY_AT") {
            Some(raw) => NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|e| {
                ConfigError::InvalidEnvVar("PAYMENT_ARCHIVAL_DAILY_AT".to_string(), e.to_string())
            })?,
            None => defaults.archival_daily_at,
        };

        let recovery_interval = parse_millis_or(
            &lookup,
            "PAYMENT_RECOVERY_INTERVAL_MS",
            defaults.recovery_interval,
        )?;
        if recovery_interval.is_zero() || recovery_interval > Self::MAX_RECOVERY_INTERVAL {
            return Err(ConfigError::InvalidEnvVar(
                "PAYMENT_RECOVERY_INTERVAL_MS".to_string(),
                "must be between 1 and 86400000".to_string(),
            ));
        }

        let staleness_minutes = parse_or(
            &lookup,
            "PAYMENT_PENDING_STALENESS_MINUTES",
            defaults.pending_staleness.num_minutes(),
        )?;
        if !(1..=Self::MAX_STALENESS_MINUTES).contains(&staleness_minutes) {
            return Err(ConfigError::InvalidEnvVar(
                "PAYMENT_PENDING_STALENESS_MINUTES".to_string(),
                format!("must be between 1 and {}", Self::MAX_STALENESS_MINUTES),
            ));
        }

        let retention_days = parse_or(
            &lookup,
            "PAYMENT_RETENTION_DAYS",
            defaults.retention.num_days(),
        )?;
        if !(1..=Self::MAX_RETENTION_DAYS).contains(&retention_days) {
            return Err(ConfigError::InvalidEnvVar(
                "PAYMENT_RETENTION_DAYS".to_string(),
                format!("must be between 1 and {}", Self::MAX_RETENTION_DAYS),
            ));
        }

        Ok(Self {
            enabled: parse_or(&lookup, "PAYMENT_SCHEDULER_ENABLED", defaults.enabled)?,
            recovery_interval,
            pending_staleness: chrono::Duration::minutes(staleness_minutes),
            archival_daily_at,
            retention: chrono::Duration::days(retention_days),
        })
    }
}

fn validate_circuit_breaker(prefix: &str, config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&config.failure_rate_threshold) {
        return Err(ConfigError::InvalidEnvVar(
            format!("{prefix}_CB_FAILURE_RATE_THRESHOLD"),
            "must be between 0 and 100".to_string(),
        ));
    }
    if config.sliding_window_size == 0 || config.minimum_calls > config.sliding_window_size {
        return Err(ConfigError::InvalidEnvVar(
            format!("{prefix}_CB_SLIDING_WINDOW_SIZE"),
            "must be non-zero and at least the minimum number of calls".to_string(),
        ));
    }
    if config.half_open_calls == 0 {
        return Err(ConfigError::InvalidEnvVar(
            format!("{prefix}_CB_HALF_OPEN_CALLS"),
            "must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to a textual default.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse a variable read through `lookup`, falling back to a typed default.
fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key).map_or(Ok(default), |raw| {
        raw.parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Parse a millisecond count into a `Duration`.
fn parse_millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    lookup(key).map_or(Ok(default), |raw| {
        raw.parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}
