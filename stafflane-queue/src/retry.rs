//! Retry Policy Engine
//!
//! Turns a classified failure into either a scheduled retry or a terminal
//! failure. The effective policy starts from the error kind's default and is
//! then adjusted by the handler's override, the operation type, and the
//! key's failure history.

use crate::circuit::FailureHistory;
use rand::Rng;
use stafflane_core::constants::{
    CRITICAL_TYPE_BASE_DELAY_MS, CRITICAL_TYPE_MIN_RETRIES, LIGHTWEIGHT_TYPE_MAX_RETRIES,
};
use stafflane_core::{
    ErrorKind, Operation, OperationError, OperationType, RetryConfig, RetryStrategy,
};
use std::time::Duration;

/// Highest exponent used for exponential backoff; larger attempts hit the cap anyway.
const MAX_BACKOFF_EXPONENT: u32 = 62;

/// Effective retry policy for one failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedPolicy {
    pub kind: ErrorKind,
    pub strategy: RetryStrategy,
    pub max_retries: u32,
    pub base_delay: Duration,
}

/// What to do with a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule retry number `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// No further retries; the operation fails.
    GiveUp,
}

/// Delay before retry `attempt` (1-indexed).
///
/// `sample` is a jitter draw in [-1, 1], scaled by `jitter` and applied to
/// exponential delays only. The cap is applied after jitter.
pub fn backoff_delay(
    strategy: RetryStrategy,
    attempt: u32,
    base: Duration,
    max: Duration,
    jitter: f64,
    sample: f64,
) -> Duration {
    let attempt = attempt.max(1);
    let base_secs = base.as_secs_f64();
    let secs = match strategy {
        RetryStrategy::NoRetry | RetryStrategy::Immediate => 0.0,
        RetryStrategy::LinearBackoff => base_secs * f64::from(attempt),
        RetryStrategy::ExponentialBackoff => {
            let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT) as i32;
            let raw = base_secs * 2f64.powi(exponent);
            raw * (1.0 + jitter * sample.clamp(-1.0, 1.0))
        }
    };
    Duration::from_secs_f64(secs.clamp(0.0, max.as_secs_f64()))
}

/// Policy resolution and retry decisions.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    config: RetryConfig,
}

impl RetryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Effective policy for `error` on an operation of `operation_type`.
    pub fn resolve(
        &self,
        operation_type: Option<OperationType>,
        error: &OperationError,
        history: FailureHistory,
    ) -> ResolvedPolicy {
        let defaults = error.kind.default_policy();
        let mut policy = ResolvedPolicy {
            kind: error.kind,
            strategy: defaults.strategy,
            max_retries: defaults.max_retries,
            base_delay: match error.kind {
                ErrorKind::ResourceBusy => self.config.resource_busy_base_delay,
                _ => self.config.base_delay,
            },
        };
        if policy.strategy == RetryStrategy::NoRetry {
            policy.max_retries = 0;
            return policy;
        }

        if let Some(max_retries) = error.max_retries {
            policy.max_retries = max_retries;
        }

        match operation_type {
            Some(OperationType::Deployment | OperationType::SystemMaintenance) => {
                policy.max_retries = policy.max_retries.max(CRITICAL_TYPE_MIN_RETRIES);
                policy.base_delay = policy
                    .base_delay
                    .max(Duration::from_millis(CRITICAL_TYPE_BASE_DELAY_MS));
            }
            Some(OperationType::Testing | OperationType::Documentation) => {
                policy.max_retries = policy.max_retries.min(LIGHTWEIGHT_TYPE_MAX_RETRIES);
            }
            _ => {}
        }

        if self.config.adaptive {
            if history.total_failures > self.config.adaptive_total_failure_limit {
                policy.max_retries = policy.max_retries.min(1);
            }
            if history.consecutive_failures > self.config.adaptive_consecutive_failure_limit {
                policy.base_delay = policy.base_delay.saturating_mul(2);
            }
        }

        policy
    }

    /// Decide whether `op` gets another attempt after `error`.
    pub fn decide(
        &self,
        op: &Operation,
        error: &OperationError,
        history: FailureHistory,
    ) -> RetryDecision {
        let policy = self.resolve(op.operation_type, error, history);
        let attempt = op.retry_count().saturating_add(1);
        if policy.strategy == RetryStrategy::NoRetry || attempt > policy.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            attempt,
            delay: self.delay(&policy, attempt),
        }
    }

    /// Decide whether `op` gets another attempt after an open-circuit rejection.
    ///
    /// Rejections draw on their own RESOURCE_BUSY budget, counted by
    /// `circuit_retries`, and never consume `retry_count`. The delay is at
    /// least the breaker's remaining `retry_after_ms`, so the next attempt
    /// arrives once the circuit can go half-open.
    pub fn decide_circuit_rejection(
        &self,
        op: &Operation,
        rejection: &OperationError,
        history: FailureHistory,
    ) -> RetryDecision {
        let policy = self.resolve(op.operation_type, rejection, history);
        let attempt = op.circuit_retries().saturating_add(1);
        if policy.strategy == RetryStrategy::NoRetry || attempt > policy.max_retries {
            return RetryDecision::GiveUp;
        }
        let retry_after = rejection
            .context
            .get("retry_after_ms")
            .and_then(serde_json::Value::as_u64)
            .map(|ms| Duration::from_millis(ms.saturating_add(1)))
            .unwrap_or_default();
        RetryDecision::Retry {
            attempt,
            delay: self.delay(&policy, attempt).max(retry_after),
        }
    }

    /// Delay for `attempt` under `policy`, with a fresh jitter draw.
    pub fn delay(&self, policy: &ResolvedPolicy, attempt: u32) -> Duration {
        let sample = if self.config.jitter > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        backoff_delay(
            policy.strategy,
            attempt,
            policy.base_delay,
            self.config.max_delay,
            self.config.jitter,
            sample,
        )
    }
}
