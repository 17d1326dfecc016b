//! Lane workers
//!
//! Each worker pulls ids from one priority lane, claims the operation, runs
//! its handler under the circuit breaker and the handler timeout, and routes
//! the outcome through the retry engine.

use crate::retry::RetryDecision;
use crate::service::QueueInner;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use futures_util::FutureExt;
use serde_json::Value;
use stafflane_core::{
    CapabilityHandler, ErrorKind, Operation, OperationContext, OperationError, OperationId,
    OperationStatus, Priority, ProgressReporter,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a handler invocation ended.
enum Execution {
    Finished(Result<Value, OperationError>),
    /// The operation's token fired before the handler returned.
    Interrupted,
}

/// Forwards handler progress into the operation table.
struct TableProgress {
    inner: Arc<QueueInner>,
}

#[async_trait]
impl ProgressReporter for TableProgress {
    async fn report(&self, id: OperationId, progress: f64) {
        self.inner.table.set_progress(id, progress).await;
    }
}

/// Worker loop for one lane. Returns once the lane is closed or the queue
/// shuts down.
pub(crate) async fn run_lane_worker(inner: Arc<QueueInner>, priority: Priority, index: usize) {
    debug!(%priority, worker = index, "Lane worker started");
    let lane = inner.lanes.get(priority);
    while let Some(entry) = lane.dequeue(&inner.shutdown).await {
        inner.telemetry.set_lane_depth(priority, lane.len());
        debug!(
            operation_id = %entry.id,
            %priority,
            waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
            "Dequeued operation"
        );
        process(&inner, entry.id).await;
    }
    debug!(%priority, worker = index, "Lane worker stopped");
}

async fn process(inner: &Arc<QueueInner>, id: OperationId) {
    let _permit = match &inner.concurrency {
        Some(semaphore) => tokio::select! {
            permit = Arc::clone(semaphore).acquire_owned() => match permit {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
            _ = inner.shutdown.cancelled() => return,
        },
        None => None,
    };

    let Some((op, token)) = inner.table.begin_run(id).await else {
        debug!(operation_id = %id, "Operation no longer queued, skipping");
        return;
    };

    if let Err(err) = inner.circuits.check(&op.circuit_key()) {
        inner.metrics.record_circuit_rejection();
        inner.telemetry.circuit_rejections_total.inc();
        debug!(operation_id = %id, key = %op.circuit_key(), "Circuit open, execution rejected");
        handle_circuit_rejection(inner, &op, err).await;
        return;
    }

    let Some(handler) = inner.registry.get(&op.capability).await else {
        warn!(operation_id = %id, capability = %op.capability, "No handler registered");
        handle_failure(inner, &op, OperationError::no_handler(&op.capability), false).await;
        return;
    };

    inner.metrics.worker_busy();
    inner.telemetry.running_operations.inc();
    let started = Instant::now();

    let outcome = execute(inner, handler, &op, &token).await;

    inner
        .telemetry
        .record_execution(&op.capability, started.elapsed());
    inner.telemetry.running_operations.dec();
    inner.metrics.worker_idle();

    match outcome {
        Execution::Finished(Ok(value)) => handle_success(inner, &op, value).await,
        Execution::Finished(Err(err)) => handle_failure(inner, &op, err, true).await,
        Execution::Interrupted => handle_interrupted(inner, &op).await,
    }
}

async fn execute(
    inner: &Arc<QueueInner>,
    handler: Arc<dyn CapabilityHandler>,
    op: &Operation,
    token: &CancellationToken,
) -> Execution {
    let reporter = Arc::new(TableProgress {
        inner: Arc::clone(inner),
    });
    let ctx = OperationContext::new(op.clone(), token.clone()).with_progress(reporter);
    let timeout = inner.config.workers.handler_timeout;
    let call = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();

    tokio::select! {
        biased;
        _ = token.cancelled() => Execution::Interrupted,
        result = tokio::time::timeout(timeout, call) => Execution::Finished(match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(operation_id = %op.id, capability = %op.capability, panic = %message, "Handler panicked");
                Err(OperationError::execution(format!("handler panicked: {message}")))
            }
            Err(_) => {
                inner.metrics.record_timeout();
                Err(OperationError::timeout(timeout))
            }
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn handle_success(inner: &Arc<QueueInner>, op: &Operation, value: Value) {
    let applied = inner
        .table
        .apply(op.id, OperationStatus::Completed, |o| {
            o.result = Some(value);
            o.error = None;
        })
        .await;

    match applied {
        Ok(applied) => {
            inner.circuits.record_success(&op.circuit_key());
            inner.note_transition(&applied);
            info!(
                operation_id = %op.id,
                capability = %op.capability,
                duration_ms = applied.operation.duration().map(|d| d.as_millis() as u64),
                "Operation completed"
            );
        }
        Err(err) => {
            debug!(operation_id = %op.id, error = %err, "Discarding handler result");
        }
    }
}

/// Route a failed attempt to a retry, a cancellation or a terminal failure.
///
/// `counts_against_circuit` is false for attempts that never reached the
/// handler.
async fn handle_failure(
    inner: &Arc<QueueInner>,
    op: &Operation,
    err: OperationError,
    counts_against_circuit: bool,
) {
    let key = op.circuit_key();
    if counts_against_circuit {
        if let Some(state) = inner.circuits.record_failure(&key) {
            debug!(key = %key, %state, "Circuit state after failure");
        }
    }

    if err.kind == ErrorKind::Cancelled {
        finish_cancelled(inner, op.id, &err.message).await;
        return;
    }

    let history = inner.circuits.history(&key);
    match inner.retry.decide(op, &err, history) {
        RetryDecision::Retry { attempt, delay } => {
            let next_retry = Utc::now() + TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero());
            let applied = inner
                .table
                .apply(op.id, OperationStatus::Retrying, |o| {
                    o.record_retry(attempt, &err, next_retry)
                })
                .await;
            match applied {
                Ok(applied) => {
                    inner.note_transition(&applied);
                    inner.telemetry.record_retry(err.kind);
                    warn!(
                        operation_id = %op.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Operation failed, retry scheduled"
                    );
                    schedule_retry(Arc::clone(inner), op.id, delay);
                }
                Err(apply_err) => {
                    debug!(operation_id = %op.id, error = %apply_err, "Retry not scheduled");
                }
            }
        }
        RetryDecision::GiveUp => {
            let applied = inner
                .table
                .apply(op.id, OperationStatus::Failed, |o| o.record_final_error(&err))
                .await;
            match applied {
                Ok(applied) => {
                    inner.note_transition(&applied);
                    error!(
                        operation_id = %op.id,
                        capability = %op.capability,
                        retry_count = applied.operation.retry_count(),
                        error = %err,
                        "Operation failed"
                    );
                }
                Err(apply_err) => {
                    debug!(operation_id = %op.id, error = %apply_err, "Failure not recorded");
                }
            }
        }
    }
}

/// Park a rejected operation until its circuit can go half-open.
///
/// Rejections never reach the handler, so they neither count against the
/// breaker nor consume the operation's handler retries.
async fn handle_circuit_rejection(
    inner: &Arc<QueueInner>,
    op: &Operation,
    rejection: OperationError,
) {
    let history = inner.circuits.history(&op.circuit_key());
    match inner.retry.decide_circuit_rejection(op, &rejection, history) {
        RetryDecision::Retry { attempt, delay } => {
            let next_retry = Utc::now() + TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero());
            let applied = inner
                .table
                .apply(op.id, OperationStatus::Retrying, |o| {
                    o.record_circuit_retry(attempt, &rejection, next_retry)
                })
                .await;
            match applied {
                Ok(applied) => {
                    inner.note_transition(&applied);
                    inner.telemetry.record_retry(rejection.kind);
                    info!(
                        operation_id = %op.id,
                        circuit_retries = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Circuit open, operation waiting"
                    );
                    schedule_retry(Arc::clone(inner), op.id, delay);
                }
                Err(apply_err) => {
                    debug!(operation_id = %op.id, error = %apply_err, "Circuit retry not scheduled");
                }
            }
        }
        RetryDecision::GiveUp => {
            let applied = inner
                .table
                .apply(op.id, OperationStatus::Failed, |o| {
                    o.record_circuit_final_error(&rejection)
                })
                .await;
            match applied {
                Ok(applied) => {
                    inner.note_transition(&applied);
                    error!(
                        operation_id = %op.id,
                        capability = %op.capability,
                        circuit_retries = applied.operation.circuit_retries(),
                        "Operation failed, circuit stayed open"
                    );
                }
                Err(apply_err) => {
                    debug!(operation_id = %op.id, error = %apply_err, "Failure not recorded");
                }
            }
        }
    }
}

async fn handle_interrupted(inner: &Arc<QueueInner>, op: &Operation) {
    let reason = if inner.shutdown.is_cancelled() {
        "queue shut down"
    } else {
        "operation cancelled"
    };
    finish_cancelled(inner, op.id, reason).await;
}

async fn finish_cancelled(inner: &Arc<QueueInner>, id: OperationId, reason: &str) {
    let applied = inner
        .table
        .apply(id, OperationStatus::Cancelled, |o| {
            o.error = Some(reason.to_string())
        })
        .await;
    match applied {
        Ok(applied) => {
            inner.note_transition(&applied);
            debug!(operation_id = %id, reason, "Running operation cancelled");
        }
        Err(err) => debug!(operation_id = %id, error = %err, "Cancellation not recorded"),
    }
}

/// Wait out the backoff and put the operation back on its lane.
fn schedule_retry(inner: Arc<QueueInner>, id: OperationId, delay: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => inner.requeue(id).await,
            _ = inner.shutdown.cancelled() => {
                debug!(operation_id = %id, "Retry timer dropped on shutdown");
            }
        }
    });
}
