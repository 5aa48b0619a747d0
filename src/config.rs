//! Pipeline configuration.
//!
//! Configuration is env-driven with sensible defaults, covering storage,
//! queue, worker pool, task-level retry and the provider gateway.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Provider gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Provider identifier selecting the backend ("deepseek", "openai",
    /// "synthetic"). Selection happens here, never at call sites.
    pub provider: String,
    /// API key. When absent the gateway runs in degraded mode and returns
    /// clearly-tagged synthetic responses.
    pub api_key: Option<String>,
    /// Base URL of the provider's chat-completions endpoint.
    pub base_url: String,
    /// Model identifier sent to the provider.
    pub model: String,
    /// Grade level passed with every correction request.
    pub default_grade: String,
    /// Wall-clock budget for a single provider call.
    pub call_timeout: Duration,
    /// Gateway-level retry ceiling for transient errors.
    pub max_retries: u32,
    /// Base delay for gateway exponential backoff.
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            api_key: None,
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            default_grade: "junior".to_string(),
            call_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Storage
    /// PostgreSQL connection URL.
    pub database_url: String,

    // Queue
    /// Redis connection URL.
    pub redis_url: String,
    /// Name of the correction job queue.
    pub queue_name: String,

    // Worker pool
    /// Number of concurrent workers.
    pub num_workers: usize,
    /// How long a worker blocks waiting for a job.
    pub poll_interval: Duration,
    /// Maximum wall-clock time for processing one job.
    pub job_timeout: Duration,
    /// Timeout for graceful pool shutdown.
    pub shutdown_timeout: Duration,

    // Task-level retry (distinct from gateway-level retry)
    /// Maximum correction attempts per essay before terminal failure.
    pub max_attempts: u32,
    /// Delay before a failed correction is re-attempted. Minutes, not
    /// seconds: a task retry repeats the whole correction including a fresh
    /// gateway call.
    pub retry_delay: Duration,

    // Reconciliation sweep
    /// Interval between sweep passes.
    pub sweep_interval: Duration,
    /// An essay stuck in `correcting` longer than this is considered
    /// orphaned and reset.
    pub stale_after: Duration,
    /// An essay stuck in `pending` longer than this is re-dispatched
    /// (covers a lost enqueue).
    pub pending_redispatch_after: Duration,

    /// Provider gateway settings.
    pub gateway: GatewayConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/redink".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            queue_name: "corrections".to_string(),
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_delay: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(600),
            pending_redispatch_after: Duration::from_secs(300),
            gateway: GatewayConfig::default(),
        }
    }
}

impl AppConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection URL
    /// - `REDIS_URL`: Redis connection URL
    /// - `REDINK_QUEUE_NAME`: queue name (default: corrections)
    /// - `REDINK_NUM_WORKERS`: worker count (default: 4)
    /// - `REDINK_POLL_INTERVAL_SECS`: dequeue wait (default: 1)
    /// - `REDINK_JOB_TIMEOUT_SECS`: per-job budget (default: 300)
    /// - `REDINK_SHUTDOWN_TIMEOUT_SECS`: graceful shutdown (default: 60)
    /// - `REDINK_MAX_ATTEMPTS`: task-level attempt ceiling (default: 3)
    /// - `REDINK_RETRY_DELAY_SECS`: delay before re-attempt (default: 120)
    /// - `REDINK_SWEEP_INTERVAL_SECS`: sweep cadence (default: 60)
    /// - `REDINK_STALE_AFTER_SECS`: correcting staleness (default: 600)
    /// - `REDINK_PENDING_AFTER_SECS`: pending re-dispatch (default: 300)
    /// - `REDINK_PROVIDER`: grading backend (default: deepseek)
    /// - `REDINK_API_KEY`: provider credentials (optional; synthetic mode
    ///   without it)
    /// - `REDINK_BASE_URL`, `REDINK_MODEL`, `REDINK_GRADE`
    /// - `REDINK_CALL_TIMEOUT_SECS`, `REDINK_GATEWAY_RETRIES`,
    ///   `REDINK_GATEWAY_RETRY_DELAY_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DATABASE_URL") {
            config.database_url = val;
        }
        if let Ok(val) = std::env::var("REDIS_URL") {
            config.redis_url = val;
        }
        if let Ok(val) = std::env::var("REDINK_QUEUE_NAME") {
            config.queue_name = val;
        }
        if let Ok(val) = std::env::var("REDINK_NUM_WORKERS") {
            config.num_workers = parse_env_value(&val, "REDINK_NUM_WORKERS")?;
        }
        if let Ok(val) = std::env::var("REDINK_POLL_INTERVAL_SECS") {
            config.poll_interval = parse_env_secs(&val, "REDINK_POLL_INTERVAL_SECS")?;
        }
        if let Ok(val) = std::env::var("REDINK_JOB_TIMEOUT_SECS") {
            config.job_timeout = parse_env_secs(&val, "REDINK_JOB_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("REDINK_SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout = parse_env_secs(&val, "REDINK_SHUTDOWN_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("REDINK_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "REDINK_MAX_ATTEMPTS")?;
        }
        if let Ok(val) = std::env::var("REDINK_RETRY_DELAY_SECS") {
            config.retry_delay = parse_env_secs(&val, "REDINK_RETRY_DELAY_SECS")?;
        }
        if let Ok(val) = std::env::var("REDINK_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = parse_env_secs(&val, "REDINK_SWEEP_INTERVAL_SECS")?;
        }
        if let Ok(val) = std::env::var("REDINK_STALE_AFTER_SECS") {
            config.stale_after = parse_env_secs(&val, "REDINK_STALE_AFTER_SECS")?;
        }
        if let Ok(val) = std::env::var("REDINK_PENDING_AFTER_SECS") {
            config.pending_redispatch_after = parse_env_secs(&val, "REDINK_PENDING_AFTER_SECS")?;
        }

        if let Ok(val) = std::env::var("REDINK_PROVIDER") {
            config.gateway.provider = val;
        }
        if let Ok(val) = std::env::var("REDINK_API_KEY") {
            if !val.trim().is_empty() {
                config.gateway.api_key = Some(val);
            }
        }
        if let Ok(val) = std::env::var("REDINK_BASE_URL") {
            config.gateway.base_url = val;
        }
        if let Ok(val) = std::env::var("REDINK_MODEL") {
            config.gateway.model = val;
        }
        if let Ok(val) = std::env::var("REDINK_GRADE") {
            config.gateway.default_grade = val;
        }
        if let Ok(val) = std::env::var("REDINK_CALL_TIMEOUT_SECS") {
            config.gateway.call_timeout = parse_env_secs(&val, "REDINK_CALL_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("REDINK_GATEWAY_RETRIES") {
            config.gateway.max_retries = parse_env_value(&val, "REDINK_GATEWAY_RETRIES")?;
        }
        if let Ok(val) = std::env::var("REDINK_GATEWAY_RETRY_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "REDINK_GATEWAY_RETRY_DELAY_MS")?;
            config.gateway.retry_base_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.gateway.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "gateway max_retries must be at least 1".to_string(),
            ));
        }
        if self.stale_after < self.job_timeout {
            return Err(ConfigError::ValidationFailed(format!(
                "stale_after ({:?}) must not be shorter than job_timeout ({:?})",
                self.stale_after, self.job_timeout
            )));
        }
        Ok(())
    }
}

/// Parses an environment variable value into the requested type.
fn parse_env_value<T: FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{}", e),
    })
}

/// Parses an environment variable value as a duration in whole seconds.
fn parse_env_secs(val: &str, key: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_env_value(val, key)?;
    Ok(Duration::from_secs(secs))
}
