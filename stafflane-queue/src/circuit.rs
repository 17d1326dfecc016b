//! Circuit Breaker registry
//!
//! Failure history and breakers keyed by `project_id:operation_id`.
//!
//! ```text
//! closed ──(consecutive ≥ N or windowed ≥ M)──→ open
//! open ──(reset_timeout elapsed, on next check)──→ half_open
//! half_open ──success──→ closed
//! half_open ──failure──→ open
//! ```
//!
//! Timing uses `tokio::time::Instant` so tests can drive it with a paused
//! clock.

use dashmap::DashMap;
use serde_json::json;
use stafflane_core::{CircuitBreakerConfig, CircuitState, OperationError};
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Failure counters consulted by the retry engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureHistory {
    pub total_failures: u32,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
struct Breaker {
    created_at: Instant,
    opened_at: Instant,
    state: CircuitState,
}

#[derive(Debug, Clone)]
struct FailureRecord {
    total_failures: u32,
    consecutive_failures: u32,
    recent_failures: VecDeque<Instant>,
    last_attempt: Instant,
    last_succeeded: bool,
    breaker: Option<Breaker>,
}

impl FailureRecord {
    fn new(now: Instant) -> Self {
        Self {
            total_failures: 0,
            consecutive_failures: 0,
            recent_failures: VecDeque::new(),
            last_attempt: now,
            last_succeeded: true,
            breaker: None,
        }
    }

    fn state(&self) -> CircuitState {
        self.breaker
            .as_ref()
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }
}

/// Counts removed by a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub breakers_removed: usize,
    pub records_removed: usize,
}

/// Per-key failure tracking and circuit breaking.
#[derive(Debug)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    records: DashMap<String, FailureRecord>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether an execution for `key` may proceed.
    ///
    /// An open breaker past its reset timeout moves to half-open and lets the
    /// call through as a trial. Rejections are not recorded as failures.
    pub fn check(&self, key: &str) -> Result<(), OperationError> {
        if !self.config.enabled {
            return Ok(());
        }
        let Some(mut record) = self.records.get_mut(key) else {
            return Ok(());
        };
        let Some(breaker) = record.breaker.as_mut() else {
            return Ok(());
        };

        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = breaker.opened_at.elapsed();
                if elapsed >= self.config.reset_timeout {
                    breaker.state = CircuitState::HalfOpen;
                    info!(circuit_key = %key, "Circuit half-open, allowing trial call");
                    Ok(())
                } else {
                    let retry_after = self.config.reset_timeout - elapsed;
                    debug!(circuit_key = %key, "Circuit open, rejecting execution");
                    Err(
                        OperationError::resource_busy(format!("circuit open for {key}"))
                            .with_context(json!({
                                "circuit_key": key,
                                "retry_after_ms": retry_after.as_millis() as u64,
                            })),
                    )
                }
            }
        }
    }

    /// Record a successful execution. Closes a half-open breaker.
    pub fn record_success(&self, key: &str) {
        let now = Instant::now();
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| FailureRecord::new(now));
        record.consecutive_failures = 0;
        record.last_attempt = now;
        record.last_succeeded = true;
        if let Some(breaker) = record.breaker.as_mut() {
            if breaker.state != CircuitState::Closed {
                breaker.state = CircuitState::Closed;
                info!(circuit_key = %key, "Circuit closed after successful trial call");
            }
        }
    }

    /// Record a failed execution. Returns the new state if it changed.
    pub fn record_failure(&self, key: &str) -> Option<CircuitState> {
        let now = Instant::now();
        let window = self.config.failure_window;
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| FailureRecord::new(now));

        record.total_failures = record.total_failures.saturating_add(1);
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_attempt = now;
        record.last_succeeded = false;
        while record
            .recent_failures
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) > window)
        {
            record.recent_failures.pop_front();
        }
        record.recent_failures.push_back(now);

        if !self.config.enabled {
            return None;
        }

        match record.state() {
            CircuitState::HalfOpen => {
                if let Some(breaker) = record.breaker.as_mut() {
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = now;
                }
                warn!(circuit_key = %key, "Trial call failed, circuit re-opened");
                Some(CircuitState::Open)
            }
            CircuitState::Open => None,
            CircuitState::Closed => {
                let consecutive = record.consecutive_failures;
                let windowed = record.recent_failures.len() as u32;
                if consecutive >= self.config.consecutive_failure_threshold
                    || windowed >= self.config.window_failure_threshold
                {
                    record.breaker = Some(Breaker {
                        created_at: now,
                        opened_at: now,
                        state: CircuitState::Open,
                    });
                    warn!(
                        circuit_key = %key,
                        consecutive_failures = consecutive,
                        windowed_failures = windowed,
                        "Circuit opened"
                    );
                    Some(CircuitState::Open)
                } else {
                    None
                }
            }
        }
    }

    /// Current state for `key` without side effects.
    pub fn state(&self, key: &str) -> CircuitState {
        self.records
            .get(key)
            .map(|r| r.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn history(&self, key: &str) -> FailureHistory {
        self.records
            .get(key)
            .map(|r| FailureHistory {
                total_failures: r.total_failures,
                consecutive_failures: r.consecutive_failures,
            })
            .unwrap_or_default()
    }

    /// Number of breakers that are open or half-open.
    pub fn open_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state() != CircuitState::Closed)
            .count()
    }

    pub fn tracked_keys(&self) -> usize {
        self.records.len()
    }

    /// Drop expired breakers and idle failure records.
    pub fn cleanup(&self) -> CleanupStats {
        let now = Instant::now();
        let mut stats = CleanupStats::default();
        let breaker_ttl = self.config.breaker_ttl;
        let idle_ttl = self.config.record_idle_ttl;

        self.records.retain(|_, record| {
            if record
                .breaker
                .as_ref()
                .is_some_and(|b| now.saturating_duration_since(b.created_at) >= breaker_ttl)
            {
                record.breaker = None;
                stats.breakers_removed += 1;
            }
            let idle = now.saturating_duration_since(record.last_attempt) >= idle_ttl;
            if idle && record.breaker.is_none() {
                stats.records_removed += 1;
                return false;
            }
            true
        });

        if stats.breakers_removed > 0 || stats.records_removed > 0 {
            debug!(
                breakers_removed = stats.breakers_removed,
                records_removed = stats.records_removed,
                "Circuit cleanup pass"
            );
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stafflane_core::ErrorKind;
    use std::time::Duration;

    const KEY: &str = "p1:op-1";

    fn registry() -> CircuitRegistry {
        CircuitRegistry::new(CircuitBreakerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_consecutive_failures() {
        let circuits = registry();
        for _ in 0..4 {
            assert_eq!(circuits.record_failure(KEY), None);
        }
        assert_eq!(circuits.state(KEY), CircuitState::Closed);
        assert_eq!(circuits.record_failure(KEY), Some(CircuitState::Open));

        let err = circuits.check(KEY).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceBusy);
        assert_eq!(circuits.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_do_not_count_as_failures() {
        let circuits = registry();
        for _ in 0..5 {
            circuits.record_failure(KEY);
        }
        let before = circuits.history(KEY);
        assert!(circuits.check(KEY).is_err());
        assert!(circuits.check(KEY).is_err());
        assert_eq!(circuits.history(KEY), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_then_close_on_success() {
        let circuits = registry();
        for _ in 0..5 {
            circuits.record_failure(KEY);
        }
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(circuits.check(KEY).is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(circuits.check(KEY).is_ok());
        assert_eq!(circuits.state(KEY), CircuitState::HalfOpen);

        circuits.record_success(KEY);
        assert_eq!(circuits.state(KEY), CircuitState::Closed);
        assert_eq!(circuits.history(KEY).consecutive_failures, 0);
        assert!(circuits.check(KEY).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let circuits = registry();
        for _ in 0..5 {
            circuits.record_failure(KEY);
        }
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(circuits.check(KEY).is_ok());
        assert_eq!(circuits.record_failure(KEY), Some(CircuitState::Open));
        assert!(circuits.check(KEY).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_windowed_threshold_opens() {
        let config = CircuitBreakerConfig {
            consecutive_failure_threshold: 100,
            ..CircuitBreakerConfig::default()
        };
        let circuits = CircuitRegistry::new(config);
        for i in 0..9 {
            circuits.record_failure(KEY);
            if i % 2 == 0 {
                circuits.record_success(KEY);
            }
            tokio::time::advance(Duration::from_secs(10)).await;
        }
        assert_eq!(circuits.state(KEY), CircuitState::Closed);
        assert_eq!(circuits.record_failure(KEY), Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_failures_leave_the_window() {
        let config = CircuitBreakerConfig {
            consecutive_failure_threshold: 100,
            ..CircuitBreakerConfig::default()
        };
        let circuits = CircuitRegistry::new(config);
        for _ in 0..9 {
            circuits.record_failure(KEY);
        }
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(circuits.record_failure(KEY), None);
        assert_eq!(circuits.history(KEY).total_failures, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_expired_state() {
        let circuits = registry();
        for _ in 0..5 {
            circuits.record_failure(KEY);
        }
        circuits.record_failure("p1:other");

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let stats = circuits.cleanup();
        assert_eq!(stats.breakers_removed, 1);
        assert_eq!(stats.records_removed, 0);
        assert_eq!(circuits.state(KEY), CircuitState::Closed);

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let stats = circuits.cleanup();
        assert_eq!(stats.records_removed, 2);
        assert_eq!(circuits.tracked_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_rejects() {
        let config = CircuitBreakerConfig {
            enabled: false,
            ..CircuitBreakerConfig::default()
        };
        let circuits = CircuitRegistry::new(config);
        for _ in 0..20 {
            assert_eq!(circuits.record_failure(KEY), None);
        }
        assert!(circuits.check(KEY).is_ok());
        assert_eq!(circuits.history(KEY).total_failures, 20);
    }
}
