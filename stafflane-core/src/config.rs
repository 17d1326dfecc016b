//! Engine configuration
//!
//! Every section has a `Default` built from `constants.rs`, a `from_env()`
//! constructor reading `STAFFLANE_*` variables, and a `development()` preset
//! with short timings. `EngineConfig::validate` checks the whole tree.

use crate::constants::*;
use crate::error::ConfigError;
use std::str::FromStr;
use std::time::Duration;

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| !matches!(s.to_lowercase().as_str(), "false" | "0" | "no" | "off"))
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(key).unwrap_or(default))
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_parse(key).unwrap_or(default))
}

// ============================================================================
// WORKERS
// ============================================================================

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Workers per priority lane (default: 5)
    pub workers_per_lane: usize,

    /// Deadline for one handler invocation (default: 300s)
    pub handler_timeout: Duration,

    /// Optional global ceiling on concurrently running handlers.
    /// `None` means the ceiling is the total worker count.
    pub max_concurrent: Option<usize>,

    /// Terminal operations kept readable after finishing (default: 1000)
    pub finished_retention: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers_per_lane: DEFAULT_WORKERS_PER_LANE,
            handler_timeout: Duration::from_secs(DEFAULT_HANDLER_TIMEOUT_SECS),
            max_concurrent: None,
            finished_retention: DEFAULT_FINISHED_RETENTION,
        }
    }
}

impl WorkerConfig {
    /// # Environment Variables
    /// - `STAFFLANE_WORKERS_PER_LANE` (default: 5)
    /// - `STAFFLANE_HANDLER_TIMEOUT_SECS` (default: 300)
    /// - `STAFFLANE_MAX_CONCURRENT` (default: unset)
    /// - `STAFFLANE_FINISHED_RETENTION` (default: 1000)
    pub fn from_env() -> Self {
        Self {
            workers_per_lane: env_parse("STAFFLANE_WORKERS_PER_LANE")
                .unwrap_or(DEFAULT_WORKERS_PER_LANE),
            handler_timeout: env_secs(
                "STAFFLANE_HANDLER_TIMEOUT_SECS",
                DEFAULT_HANDLER_TIMEOUT_SECS,
            ),
            max_concurrent: env_parse("STAFFLANE_MAX_CONCURRENT"),
            finished_retention: env_parse("STAFFLANE_FINISHED_RETENTION")
                .unwrap_or(DEFAULT_FINISHED_RETENTION),
        }
    }

    pub fn development() -> Self {
        Self {
            workers_per_lane: 2,
            handler_timeout: Duration::from_secs(30),
            max_concurrent: None,
            finished_retention: 100,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers_per_lane == 0 {
            return Err(ConfigError::invalid(
                "workers_per_lane",
                self.workers_per_lane,
                "must be at least 1",
            ));
        }
        if self.handler_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "handler_timeout",
                "0s",
                "must be greater than zero",
            ));
        }
        if self.max_concurrent == Some(0) {
            return Err(ConfigError::invalid(
                "max_concurrent",
                0,
                "must be at least 1 when set",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// RETRY
// ============================================================================

/// Retry policy engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Base delay for linear and exponential backoff (default: 1s)
    pub base_delay: Duration,

    /// Cap applied to every computed delay (default: 60s)
    pub max_delay: Duration,

    /// Base delay for RESOURCE_BUSY failures (default: 5s)
    pub resource_busy_base_delay: Duration,

    /// Fractional jitter on exponential delays, in [0, 0.3] (default: 0.1)
    pub jitter: f64,

    /// Adjust retries from per-key failure history (default: true)
    pub adaptive: bool,

    /// Total failures above which a key gets a single retry (default: 10)
    pub adaptive_total_failure_limit: u32,

    /// Consecutive failures above which the base delay doubles (default: 3)
    pub adaptive_consecutive_failure_limit: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            resource_busy_base_delay: Duration::from_millis(DEFAULT_RESOURCE_BUSY_BASE_DELAY_MS),
            jitter: DEFAULT_RETRY_JITTER,
            adaptive: true,
            adaptive_total_failure_limit: DEFAULT_ADAPTIVE_TOTAL_FAILURE_LIMIT,
            adaptive_consecutive_failure_limit: DEFAULT_ADAPTIVE_CONSECUTIVE_FAILURE_LIMIT,
        }
    }
}

impl RetryConfig {
    /// # Environment Variables
    /// - `STAFFLANE_RETRY_BASE_DELAY_MS` (default: 1000)
    /// - `STAFFLANE_RETRY_MAX_DELAY_MS` (default: 60000)
    /// - `STAFFLANE_RETRY_RESOURCE_BUSY_DELAY_MS` (default: 5000)
    /// - `STAFFLANE_RETRY_JITTER` (default: 0.1)
    /// - `STAFFLANE_RETRY_ADAPTIVE` (default: true)
    pub fn from_env() -> Self {
        Self {
            base_delay: env_millis("STAFFLANE_RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: env_millis("STAFFLANE_RETRY_MAX_DELAY_MS", DEFAULT_RETRY_MAX_DELAY_MS),
            resource_busy_base_delay: env_millis(
                "STAFFLANE_RETRY_RESOURCE_BUSY_DELAY_MS",
                DEFAULT_RESOURCE_BUSY_BASE_DELAY_MS,
            ),
            jitter: env_parse("STAFFLANE_RETRY_JITTER").unwrap_or(DEFAULT_RETRY_JITTER),
            adaptive: env_flag("STAFFLANE_RETRY_ADAPTIVE", true),
            adaptive_total_failure_limit: DEFAULT_ADAPTIVE_TOTAL_FAILURE_LIMIT,
            adaptive_consecutive_failure_limit: DEFAULT_ADAPTIVE_CONSECUTIVE_FAILURE_LIMIT,
        }
    }

    pub fn development() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            resource_busy_base_delay: Duration::from_millis(500),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid(
                "base_delay",
                format!("{}ms", self.base_delay.as_millis()),
                "must not exceed max_delay",
            ));
        }
        if !(0.0..=MAX_RETRY_JITTER).contains(&self.jitter) {
            return Err(ConfigError::invalid(
                "jitter",
                self.jitter,
                "must be in [0, 0.3]",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Whether breakers are consulted at all (default: true)
    pub enabled: bool,

    /// Consecutive failures that open a circuit (default: 5)
    pub consecutive_failure_threshold: u32,

    /// Failures inside `failure_window` that open a circuit (default: 10)
    pub window_failure_threshold: u32,

    /// Window for the windowed threshold (default: 5 minutes)
    pub failure_window: Duration,

    /// Time from opening until a trial call is allowed (default: 60s)
    pub reset_timeout: Duration,

    /// Breakers older than this (since creation) are dropped (default: 30 minutes)
    pub breaker_ttl: Duration,

    /// Failure records idle longer than this are dropped (default: 1 hour)
    pub record_idle_ttl: Duration,

    /// Cleanup job period (default: 5 minutes)
    pub cleanup_interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            consecutive_failure_threshold: DEFAULT_CIRCUIT_CONSECUTIVE_THRESHOLD,
            window_failure_threshold: DEFAULT_CIRCUIT_WINDOW_THRESHOLD,
            failure_window: Duration::from_secs(DEFAULT_CIRCUIT_FAILURE_WINDOW_SECS),
            reset_timeout: Duration::from_secs(DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS),
            breaker_ttl: Duration::from_secs(DEFAULT_CIRCUIT_BREAKER_TTL_SECS),
            record_idle_ttl: Duration::from_secs(DEFAULT_CIRCUIT_RECORD_IDLE_TTL_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CIRCUIT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl CircuitBreakerConfig {
    /// # Environment Variables
    /// - `STAFFLANE_CIRCUIT_ENABLED` (default: true)
    /// - `STAFFLANE_CIRCUIT_CONSECUTIVE_THRESHOLD` (default: 5)
    /// - `STAFFLANE_CIRCUIT_WINDOW_THRESHOLD` (default: 10)
    /// - `STAFFLANE_CIRCUIT_FAILURE_WINDOW_SECS` (default: 300)
    /// - `STAFFLANE_CIRCUIT_RESET_TIMEOUT_SECS` (default: 60)
    /// - `STAFFLANE_CIRCUIT_CLEANUP_INTERVAL_SECS` (default: 300)
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag("STAFFLANE_CIRCUIT_ENABLED", true),
            consecutive_failure_threshold: env_parse("STAFFLANE_CIRCUIT_CONSECUTIVE_THRESHOLD")
                .unwrap_or(DEFAULT_CIRCUIT_CONSECUTIVE_THRESHOLD),
            window_failure_threshold: env_parse("STAFFLANE_CIRCUIT_WINDOW_THRESHOLD")
                .unwrap_or(DEFAULT_CIRCUIT_WINDOW_THRESHOLD),
            failure_window: env_secs(
                "STAFFLANE_CIRCUIT_FAILURE_WINDOW_SECS",
                DEFAULT_CIRCUIT_FAILURE_WINDOW_SECS,
            ),
            reset_timeout: env_secs(
                "STAFFLANE_CIRCUIT_RESET_TIMEOUT_SECS",
                DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS,
            ),
            breaker_ttl: Duration::from_secs(DEFAULT_CIRCUIT_BREAKER_TTL_SECS),
            record_idle_ttl: Duration::from_secs(DEFAULT_CIRCUIT_RECORD_IDLE_TTL_SECS),
            cleanup_interval: env_secs(
                "STAFFLANE_CIRCUIT_CLEANUP_INTERVAL_SECS",
                DEFAULT_CIRCUIT_CLEANUP_INTERVAL_SECS,
            ),
        }
    }

    pub fn development() -> Self {
        Self {
            reset_timeout: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(30),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consecutive_failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "consecutive_failure_threshold",
                0,
                "must be at least 1",
            ));
        }
        if self.window_failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "window_failure_threshold",
                0,
                "must be at least 1",
            ));
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "reset_timeout",
                "0s",
                "must be greater than zero",
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::invalid(
                "cleanup_interval",
                "0s",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// PUBLISHER
// ============================================================================

/// Status publisher configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    /// Bounded channel capacity per subscriber (default: 256)
    pub subscriber_capacity: usize,

    /// Queue status broadcast period to `system` subscribers (default: 5s)
    pub queue_status_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            queue_status_interval: Duration::from_secs(DEFAULT_QUEUE_STATUS_INTERVAL_SECS),
        }
    }
}

impl PublisherConfig {
    /// # Environment Variables
    /// - `STAFFLANE_SUBSCRIBER_CAPACITY` (default: 256)
    /// - `STAFFLANE_QUEUE_STATUS_INTERVAL_SECS` (default: 5)
    pub fn from_env() -> Self {
        Self {
            subscriber_capacity: env_parse("STAFFLANE_SUBSCRIBER_CAPACITY")
                .unwrap_or(DEFAULT_SUBSCRIBER_CAPACITY),
            queue_status_interval: env_secs(
                "STAFFLANE_QUEUE_STATUS_INTERVAL_SECS",
                DEFAULT_QUEUE_STATUS_INTERVAL_SECS,
            ),
        }
    }

    pub fn development() -> Self {
        Self {
            subscriber_capacity: 64,
            queue_status_interval: Duration::from_secs(1),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscriber_capacity == 0 {
            return Err(ConfigError::invalid(
                "subscriber_capacity",
                0,
                "must be at least 1",
            ));
        }
        if self.queue_status_interval.is_zero() {
            return Err(ConfigError::invalid(
                "queue_status_interval",
                "0s",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Metrics aggregator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Sampling period (default: 60s)
    pub sample_interval: Duration,

    /// Window kept at full resolution (default: 1 hour)
    pub full_resolution_window: Duration,

    /// Window kept downsampled (default: 24 hours)
    pub downsampled_window: Duration,

    /// Spacing of downsampled points (default: 15 minutes)
    pub downsample_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(DEFAULT_METRICS_SAMPLE_INTERVAL_SECS),
            full_resolution_window: Duration::from_secs(DEFAULT_METRICS_FULL_WINDOW_SECS),
            downsampled_window: Duration::from_secs(DEFAULT_METRICS_DOWNSAMPLED_WINDOW_SECS),
            downsample_interval: Duration::from_secs(DEFAULT_METRICS_DOWNSAMPLE_INTERVAL_SECS),
        }
    }
}

impl MetricsConfig {
    /// # Environment Variables
    /// - `STAFFLANE_METRICS_SAMPLE_INTERVAL_SECS` (default: 60)
    pub fn from_env() -> Self {
        Self {
            sample_interval: env_secs(
                "STAFFLANE_METRICS_SAMPLE_INTERVAL_SECS",
                DEFAULT_METRICS_SAMPLE_INTERVAL_SECS,
            ),
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval.is_zero() {
            return Err(ConfigError::invalid(
                "sample_interval",
                "0s",
                "must be greater than zero",
            ));
        }
        if self.downsample_interval.is_zero() {
            return Err(ConfigError::invalid(
                "downsample_interval",
                "0s",
                "must be greater than zero",
            ));
        }
        if self.full_resolution_window < self.sample_interval {
            return Err(ConfigError::invalid(
                "full_resolution_window",
                format!("{}s", self.full_resolution_window.as_secs()),
                "must cover at least one sample interval",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub workers: WorkerConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub publisher: PublisherConfig,
    pub metrics: MetricsConfig,
}

impl EngineConfig {
    /// Build every section from `STAFFLANE_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            workers: WorkerConfig::from_env(),
            retry: RetryConfig::from_env(),
            circuit_breaker: CircuitBreakerConfig::from_env(),
            publisher: PublisherConfig::from_env(),
            metrics: MetricsConfig::from_env(),
        }
    }

    /// Short timings for local development.
    pub fn development() -> Self {
        Self {
            workers: WorkerConfig::development(),
            retry: RetryConfig::development(),
            circuit_breaker: CircuitBreakerConfig::development(),
            publisher: PublisherConfig::development(),
            metrics: MetricsConfig::development(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.workers.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.publisher.validate()?;
        self.metrics.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.workers.workers_per_lane, DEFAULT_WORKERS_PER_LANE);
        assert_eq!(config.workers.handler_timeout, Duration::from_secs(300));
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert_eq!(config.retry.resource_busy_base_delay, Duration::from_secs(5));
        assert_eq!(config.circuit_breaker.consecutive_failure_threshold, 5);
        assert_eq!(config.circuit_breaker.window_failure_threshold, 10);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(60));
        assert_eq!(config.publisher.queue_status_interval, Duration::from_secs(5));
        assert_eq!(config.metrics.sample_interval, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_development_is_valid() {
        let config = EngineConfig::development();
        assert!(config.validate().is_ok());
        assert!(config.retry.base_delay < RetryConfig::default().base_delay);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Without environment variables set, should use defaults
        let config = EngineConfig::from_env();
        assert_eq!(config.workers.workers_per_lane, DEFAULT_WORKERS_PER_LANE);
        assert_eq!(config.circuit_breaker.consecutive_failure_threshold, 5);
        assert!(config.circuit_breaker.enabled);
        assert!(config.retry.adaptive);
    }

    #[test]
    fn test_validate_rejects_base_above_max() {
        let mut config = EngineConfig::default();
        config.retry.base_delay = Duration::from_secs(120);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "base_delay"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_max_concurrent() {
        let mut config = EngineConfig::default();
        config.workers.max_concurrent = Some(0);
        assert!(config.validate().is_err());
        config.workers.max_concurrent = Some(3);
        assert!(config.validate().is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_jitter_validation(jitter in -1.0f64..2.0) {
            let config = RetryConfig { jitter, ..RetryConfig::default() };
            prop_assert_eq!(config.validate().is_ok(), (0.0..=MAX_RETRY_JITTER).contains(&jitter));
        }

        #[test]
        fn prop_worker_count_validation(workers in 0usize..64) {
            let config = WorkerConfig { workers_per_lane: workers, ..WorkerConfig::default() };
            prop_assert_eq!(config.validate().is_ok(), workers > 0);
        }
    }
}
