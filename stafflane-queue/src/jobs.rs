//! Background maintenance tasks
//!
//! Spawned by [`OperationQueue::start`](crate::OperationQueue::start) and
//! stopped by the queue's shutdown token:
//!
//! - circuit cleanup drops stale breakers and idle failure records
//! - queue status broadcasts lane sizes to `system` subscribers
//! - the metrics sampler records a snapshot and refreshes gauges

use crate::events::StatusEvent;
use crate::service::QueueInner;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

pub(crate) async fn circuit_cleanup_task(inner: Arc<QueueInner>) {
    let period = inner.config.circuit_breaker.cleanup_interval;
    let mut cleanup_interval = ticker(period);
    // The first tick completes immediately.
    cleanup_interval.tick().await;

    tracing::info!(
        interval_secs = period.as_secs(),
        "Circuit cleanup task started"
    );

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                tracing::info!("Circuit cleanup task shutting down");
                break;
            }

            _ = cleanup_interval.tick() => {
                let stats = inner.circuits.cleanup();
                if stats.breakers_removed > 0 || stats.records_removed > 0 {
                    tracing::info!(
                        breakers_removed = stats.breakers_removed,
                        records_removed = stats.records_removed,
                        tracked = inner.circuits.tracked_keys(),
                        "Cleaned up circuit breakers"
                    );
                }
            }
        }
    }
}

pub(crate) async fn queue_status_task(inner: Arc<QueueInner>) {
    let period = inner.config.publisher.queue_status_interval;
    let mut status_interval = ticker(period);
    status_interval.tick().await;

    tracing::debug!(
        interval_secs = period.as_secs(),
        "Queue status broadcaster started"
    );

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                tracing::debug!("Queue status broadcaster shutting down");
                break;
            }

            _ = status_interval.tick() => {
                let status = inner.queue_status().await;
                inner.publisher.publish_system(StatusEvent::queue_status(status));
            }
        }
    }
}

pub(crate) async fn metrics_sampler_task(inner: Arc<QueueInner>) {
    let period = inner.config.metrics.sample_interval;
    let mut sample_interval = ticker(period);
    sample_interval.tick().await;

    tracing::info!(
        interval_secs = period.as_secs(),
        "Metrics sampler started"
    );

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                tracing::info!("Metrics sampler shutting down");
                break;
            }

            _ = sample_interval.tick() => {
                let snapshot = inner.sample_metrics().await;
                tracing::debug!(
                    active = snapshot.operations.active,
                    busy_workers = snapshot.system.busy_workers,
                    open_circuits = snapshot.system.open_circuits,
                    "Recorded metrics sample"
                );
            }
        }
    }
}
