//! Metrics Aggregator
//!
//! Lock-free counters updated by workers, combined on demand with table,
//! lane and circuit readings into a [`MetricsSnapshot`]. Periodic samples
//! are published through a watch channel and kept in a two-tier history:
//! every sample for the last hour, one sample per downsample interval for
//! the last day.

use crate::lane::LaneSnapshot;
use crate::table::ActiveCounts;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use stafflane_core::{MetricsConfig, Priority, Timestamp};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

// ============================================================================
// COUNTERS
// ============================================================================

/// Running totals since the queue was created.
#[derive(Debug, Default)]
pub struct OperationCounters {
    /// Operations accepted by `submit`/`enqueue`
    pub submitted: AtomicU64,

    /// Operations that reached COMPLETED
    pub completed: AtomicU64,

    /// Operations that reached FAILED
    pub failed: AtomicU64,

    /// Operations that reached CANCELLED
    pub cancelled: AtomicU64,

    /// Retries scheduled
    pub retries: AtomicU64,

    /// Executions rejected by an open circuit
    pub circuit_rejections: AtomicU64,

    /// Handler invocations that hit the deadline
    pub timeouts: AtomicU64,
}

#[derive(Debug, Default)]
struct DurationStats {
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
}

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub active: usize,
    pub queued: usize,
    pub running: usize,
    pub retrying: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub by_priority: BTreeMap<Priority, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub worker_utilization: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub retry_rate: f64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub throughput_per_minute: f64,
    pub open_circuits: usize,
    pub circuit_rejections: u64,
    pub timeouts: u64,
    pub subscribers: usize,
}

/// Point-in-time view of the whole queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: Timestamp,
    pub operations: OperationMetrics,
    pub queues: BTreeMap<Priority, LaneSnapshot>,
    pub system: SystemMetrics,
}

impl MetricsSnapshot {
    pub fn empty() -> Self {
        Self {
            timestamp: Utc::now(),
            operations: OperationMetrics::default(),
            queues: Priority::ALL
                .iter()
                .map(|p| (*p, LaneSnapshot::default()))
                .collect(),
            system: SystemMetrics::default(),
        }
    }
}

/// Readings gathered from the rest of the queue for a snapshot.
#[derive(Debug, Clone, Default)]
pub struct MetricsInputs {
    pub counts: ActiveCounts,
    pub queues: BTreeMap<Priority, LaneSnapshot>,
    pub open_circuits: usize,
    pub total_workers: usize,
    pub subscribers: usize,
}

/// Sample history returned by [`MetricsAggregator::history`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistory {
    /// Every sample within the full-resolution window, oldest first
    pub recent: Vec<MetricsSnapshot>,
    /// One sample per downsample interval within the day window, oldest first
    pub downsampled: Vec<MetricsSnapshot>,
}

#[derive(Debug, Default)]
struct HistoryState {
    recent: VecDeque<MetricsSnapshot>,
    downsampled: VecDeque<MetricsSnapshot>,
}

fn older_than(sample: Timestamp, now: Timestamp, window: Duration) -> bool {
    now.signed_duration_since(sample)
        .to_std()
        .map(|age| age > window)
        .unwrap_or(false)
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct MetricsAggregator {
    config: MetricsConfig,
    counters: OperationCounters,
    durations: Mutex<DurationStats>,
    busy_workers: AtomicUsize,
    started_at: Instant,
    latest: watch::Sender<MetricsSnapshot>,
    history: RwLock<HistoryState>,
}

impl MetricsAggregator {
    pub fn new(config: MetricsConfig) -> Self {
        let (latest, _) = watch::channel(MetricsSnapshot::empty());
        Self {
            config,
            counters: OperationCounters::default(),
            durations: Mutex::new(DurationStats::default()),
            busy_workers: AtomicUsize::new(0),
            started_at: Instant::now(),
            latest,
            history: RwLock::new(HistoryState::default()),
        }
    }

    pub fn counters(&self) -> &OperationCounters {
        &self.counters
    }

    pub fn record_submitted(&self) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, duration: Option<Duration>) {
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(duration) = duration {
            self.record_duration(duration);
        }
    }

    pub fn record_failed(&self, duration: Option<Duration>) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        if let Some(duration) = duration {
            self.record_duration(duration);
        }
    }

    pub fn record_cancelled(&self) {
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.counters.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.counters.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_busy(&self) {
        self.busy_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_idle(&self) {
        let _ = self
            .busy_workers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    fn record_duration(&self, duration: Duration) {
        let mut stats = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        stats.count += 1;
        stats.total += duration;
        stats.min = Some(stats.min.map_or(duration, |m| m.min(duration)));
        stats.max = stats.max.max(duration);
    }

    /// Build a snapshot from the counters and the given readings.
    pub fn snapshot(&self, inputs: MetricsInputs) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let submitted = load(&self.counters.submitted);
        let completed = load(&self.counters.completed);
        let failed = load(&self.counters.failed);
        let cancelled = load(&self.counters.cancelled);
        let retries = load(&self.counters.retries);
        let finished = completed + failed;

        let (avg_ms, min_ms, max_ms) = {
            let stats = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
            let avg = if stats.count == 0 {
                0.0
            } else {
                stats.total.as_secs_f64() * 1000.0 / stats.count as f64
            };
            (
                avg,
                stats.min.unwrap_or_default().as_millis() as u64,
                stats.max.as_millis() as u64,
            )
        };

        let elapsed = self.started_at.elapsed().as_secs_f64();
        let throughput = if elapsed >= 1.0 {
            finished as f64 * 60.0 / elapsed
        } else {
            0.0
        };

        let busy = self.busy_workers.load(Ordering::Relaxed);
        let counts = inputs.counts;

        MetricsSnapshot {
            timestamp: Utc::now(),
            operations: OperationMetrics {
                active: counts.total(),
                queued: counts.queued,
                running: counts.running,
                retrying: counts.retrying,
                submitted,
                completed,
                failed,
                cancelled,
                retries,
                by_priority: counts.by_priority,
            },
            queues: inputs.queues,
            system: SystemMetrics {
                total_workers: inputs.total_workers,
                busy_workers: busy,
                worker_utilization: ratio(busy as u64, inputs.total_workers as u64),
                success_rate: ratio(completed, finished),
                error_rate: ratio(failed, finished),
                retry_rate: ratio(retries, submitted),
                avg_duration_ms: avg_ms,
                min_duration_ms: min_ms,
                max_duration_ms: max_ms,
                throughput_per_minute: throughput,
                open_circuits: inputs.open_circuits,
                circuit_rejections: load(&self.counters.circuit_rejections),
                timeouts: load(&self.counters.timeouts),
                subscribers: inputs.subscribers,
            },
        }
    }

    /// Publish a sample as the latest snapshot and append it to history.
    pub fn record_sample(&self, snapshot: MetricsSnapshot) {
        let now = snapshot.timestamp;
        {
            let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);

            let due = history.downsampled.back().map_or(true, |last| {
                now.signed_duration_since(last.timestamp)
                    .to_std()
                    .is_ok_and(|gap| gap >= self.config.downsample_interval)
            });
            if due {
                history.downsampled.push_back(snapshot.clone());
            }
            history.recent.push_back(snapshot.clone());

            let full = self.config.full_resolution_window;
            let day = self.config.downsampled_window;
            while history
                .recent
                .front()
                .is_some_and(|s| older_than(s.timestamp, now, full))
            {
                history.recent.pop_front();
            }
            while history
                .downsampled
                .front()
                .is_some_and(|s| older_than(s.timestamp, now, day))
            {
                history.downsampled.pop_front();
            }
        }
        self.latest.send_replace(snapshot);
    }

    /// Most recent recorded sample.
    pub fn latest(&self) -> MetricsSnapshot {
        self.latest.borrow().clone()
    }

    /// Watch the latest sample.
    pub fn subscribe(&self) -> watch::Receiver<MetricsSnapshot> {
        self.latest.subscribe()
    }

    pub fn history(&self) -> MetricsHistory {
        let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
        MetricsHistory {
            recent: history.recent.iter().cloned().collect(),
            downsampled: history.downsampled.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn inputs() -> MetricsInputs {
        MetricsInputs {
            total_workers: 15,
            ..MetricsInputs::default()
        }
    }

    #[test]
    fn test_rates() {
        let metrics = MetricsAggregator::new(MetricsConfig::default());
        for _ in 0..4 {
            metrics.record_submitted();
        }
        metrics.record_completed(Some(Duration::from_millis(100)));
        metrics.record_completed(Some(Duration::from_millis(300)));
        metrics.record_completed(None);
        metrics.record_failed(Some(Duration::from_millis(200)));
        metrics.record_retry();
        metrics.record_retry();

        let snapshot = metrics.snapshot(inputs());
        assert_eq!(snapshot.operations.completed, 3);
        assert_eq!(snapshot.operations.failed, 1);
        assert_eq!(snapshot.system.success_rate, 0.75);
        assert_eq!(snapshot.system.error_rate, 0.25);
        assert_eq!(snapshot.system.retry_rate, 0.5);
        assert_eq!(snapshot.system.min_duration_ms, 100);
        assert_eq!(snapshot.system.max_duration_ms, 300);
        assert!((snapshot.system.avg_duration_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_rates_are_zero_without_data() {
        let metrics = MetricsAggregator::new(MetricsConfig::default());
        let snapshot = metrics.snapshot(MetricsInputs::default());
        assert_eq!(snapshot.system.error_rate, 0.0);
        assert_eq!(snapshot.system.worker_utilization, 0.0);
        assert_eq!(snapshot.system.throughput_per_minute, 0.0);
    }

    #[test]
    fn test_worker_utilization() {
        let metrics = MetricsAggregator::new(MetricsConfig::default());
        for _ in 0..3 {
            metrics.worker_busy();
        }
        metrics.worker_idle();
        let snapshot = metrics.snapshot(MetricsInputs {
            total_workers: 4,
            ..MetricsInputs::default()
        });
        assert_eq!(snapshot.system.busy_workers, 2);
        assert_eq!(snapshot.system.worker_utilization, 0.5);

        metrics.worker_idle();
        metrics.worker_idle();
        metrics.worker_idle();
        assert_eq!(metrics.snapshot(inputs()).system.busy_workers, 0);
    }

    #[test]
    fn test_history_windows() {
        let metrics = MetricsAggregator::new(MetricsConfig::default());
        let start = Utc::now() - TimeDelta::hours(3);

        // One sample per minute for three hours.
        for minute in 0..=180 {
            let mut sample = metrics.snapshot(inputs());
            sample.timestamp = start + TimeDelta::minutes(minute);
            metrics.record_sample(sample);
        }

        let history = metrics.history();
        assert_eq!(history.recent.len(), 61);
        // Every 15 minutes over three hours, inclusive of both ends
        assert_eq!(history.downsampled.len(), 13);
        assert_eq!(
            metrics.latest().timestamp,
            start + TimeDelta::minutes(180)
        );
    }

    #[test]
    fn test_downsampled_history_drops_after_a_day() {
        let metrics = MetricsAggregator::new(MetricsConfig::default());
        let start = Utc::now() - TimeDelta::hours(30);
        for quarter in 0..=(30 * 4) {
            let mut sample = metrics.snapshot(inputs());
            sample.timestamp = start + TimeDelta::minutes(15 * quarter);
            metrics.record_sample(sample);
        }
        let history = metrics.history();
        assert_eq!(history.downsampled.len(), 24 * 4 + 1);
    }

    #[tokio::test]
    async fn test_watch_receives_samples() {
        let metrics = MetricsAggregator::new(MetricsConfig::default());
        let mut rx = metrics.subscribe();
        metrics.record_completed(None);
        metrics.record_sample(metrics.snapshot(inputs()));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().operations.completed, 1);
    }
}
