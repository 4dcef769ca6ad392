//! Log sink configuration.
//!
//! Defaults match a long-running agent host: batches of 200, a two second
//! flush cadence and a one gigabyte disk buffer under
//! `/tmp/logger_agent_buffer`. Every knob can be overridden from the
//! environment through [`SinkConfig::from_env`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LogbookError, Result};

/// Tunables for [`crate::sink::LogSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    /// Records per database insert
    pub batch_size: usize,
    /// Maximum time a partial batch waits before it is flushed
    pub flush_interval: Duration,
    /// Directory holding `buffer_*.jsonl` files for undeliverable batches
    pub buffer_dir: PathBuf,
    /// Disk quota for the buffer directory, in megabytes
    pub max_buffer_size_mb: u64,
    /// Bound of the in-memory queue between `write` and the consumer
    pub queue_capacity: usize,
    /// Insert attempts per batch before it is buffered to disk
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt
    pub retry_base_delay: Duration,
    /// Upper bound for a single backoff delay
    pub retry_max_delay: Duration,
    /// Failure rate (percent) above which the monitor raises an alert
    pub alert_failure_threshold: f64,
    /// Monitor sampling period
    pub monitor_interval: Duration,
    /// Whether the monitor task runs at all
    pub enable_monitoring: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            flush_interval: Duration::from_secs(2),
            buffer_dir: PathBuf::from("/tmp/logger_agent_buffer"),
            max_buffer_size_mb: 1000,
            queue_capacity: 10_000,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
            alert_failure_threshold: 10.0,
            monitor_interval: Duration::from_secs(60),
            enable_monitoring: true,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| LogbookError::InvalidConfig(format!("{key}={raw:?} is not valid"))),
        Err(_) => Ok(None),
    }
}

fn env_seconds(key: &str) -> Result<Option<Duration>> {
    match env_parse::<f64>(key)? {
        Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(secs) => Err(LogbookError::InvalidConfig(format!(
            "{key}={secs} must be a positive number of seconds"
        ))),
        None => Ok(None),
    }
}

impl SinkConfig {
    /// Defaults overridden by environment variables.
    ///
    /// Reads:
    /// - LOG_BATCH_SIZE, LOG_FLUSH_INTERVAL (seconds), LOG_BUFFER_DIR,
    ///   LOG_MAX_BUFFER_SIZE_MB, LOG_QUEUE_CAPACITY, LOG_MAX_RETRIES
    /// - ALERT_LOG_FAILURE_THRESHOLD (percent), MONITORING_INTERVAL (seconds),
    ///   ENABLE_MONITORING ("true"/"false")
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse("LOG_BATCH_SIZE")? {
            config.batch_size = v;
        }
        if let Some(v) = env_seconds("LOG_FLUSH_INTERVAL")? {
            config.flush_interval = v;
        }
        if let Ok(dir) = std::env::var("LOG_BUFFER_DIR") {
            config.buffer_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse("LOG_MAX_BUFFER_SIZE_MB")? {
            config.max_buffer_size_mb = v;
        }
        if let Some(v) = env_parse("LOG_QUEUE_CAPACITY")? {
            config.queue_capacity = v;
        }
        if let Some(v) = env_parse("LOG_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = env_parse("ALERT_LOG_FAILURE_THRESHOLD")? {
            config.alert_failure_threshold = v;
        }
        if let Some(v) = env_seconds("MONITORING_INTERVAL")? {
            config.monitor_interval = v;
        }
        if let Ok(flag) = std::env::var("ENABLE_MONITORING") {
            config.enable_monitoring = flag.trim().eq_ignore_ascii_case("true");
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the buffer directory
    pub fn with_buffer_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.buffer_dir = dir.into();
        self
    }

    /// Set batch size and flush interval together
    pub fn with_batching(mut self, batch_size: usize, flush_interval: Duration) -> Self {
        self.batch_size = batch_size;
        self.flush_interval = flush_interval;
        self
    }

    /// Set retry attempts and backoff bounds
    pub fn with_retry(mut self, max_retries: u32, base: Duration, max: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    /// Set queue bound
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Enable or disable the monitor task
    pub fn with_monitoring(mut self, enabled: bool, interval: Duration) -> Self {
        self.enable_monitoring = enabled;
        self.monitor_interval = interval;
        self
    }

    /// Buffer quota in bytes
    pub fn max_buffer_bytes(&self) -> u64 {
        self.max_buffer_size_mb.saturating_mul(1024 * 1024)
    }

    /// Reject settings the sink cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(LogbookError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(LogbookError::InvalidConfig("queue_capacity must be > 0".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(LogbookError::InvalidConfig("flush_interval must be > 0".into()));
        }
        if self.max_retries == 0 {
            return Err(LogbookError::InvalidConfig("max_retries must be >= 1".into()));
        }
        if self.enable_monitoring && self.monitor_interval.is_zero() {
            return Err(LogbookError::InvalidConfig("monitor_interval must be > 0".into()));
        }
        Ok(())
    }
}
