//! Operation queue service
//!
//! `OperationQueue` wires the lanes, the operation table, the handler
//! registry, the retry engine, circuit breakers, the status publisher and
//! metrics into one cloneable handle.

use crate::circuit::CircuitRegistry;
use crate::events::{QueueStatus, StatusEvent};
use crate::jobs;
use crate::lane::Lanes;
use crate::metrics::{MetricsAggregator, MetricsHistory, MetricsInputs, MetricsSnapshot};
use crate::publisher::{StatusPublisher, SubscriberId, Subscription};
use crate::registry::HandlerRegistry;
use crate::retry::RetryEngine;
use crate::table::{Applied, OperationTable};
use crate::telemetry::QueueTelemetry;
use crate::worker;
use serde_json::Value;
use stafflane_core::{
    CapabilityHandler, CircuitState, EngineConfig, HealthReport, Operation, OperationContext,
    OperationError, OperationId, OperationRequest, OperationStatus, Priority, QueueError,
    QueueResult, Scope, StafflaneResult, Transition,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state behind every [`OperationQueue`] clone and background task.
pub(crate) struct QueueInner {
    pub(crate) config: EngineConfig,
    pub(crate) lanes: Lanes,
    pub(crate) table: OperationTable,
    pub(crate) registry: HandlerRegistry,
    pub(crate) retry: RetryEngine,
    pub(crate) circuits: CircuitRegistry,
    pub(crate) publisher: Arc<StatusPublisher>,
    pub(crate) metrics: MetricsAggregator,
    pub(crate) telemetry: QueueTelemetry,
    pub(crate) concurrency: Option<Arc<Semaphore>>,
    pub(crate) shutdown: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueInner {
    pub(crate) fn total_workers(&self) -> usize {
        self.config.workers.workers_per_lane * Priority::ALL.len()
    }

    pub(crate) fn workers_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    /// Count an applied status change in metrics and telemetry.
    pub(crate) fn note_transition(&self, applied: &Applied) {
        if applied.transition != Transition::Applied {
            return;
        }
        let op = &applied.operation;
        self.telemetry.record_status(op.priority, op.status);
        match op.status {
            OperationStatus::Completed => self.metrics.record_completed(op.duration()),
            OperationStatus::Failed => self.metrics.record_failed(op.duration()),
            OperationStatus::Cancelled => self.metrics.record_cancelled(),
            OperationStatus::Retrying => self.metrics.record_retry(),
            OperationStatus::Queued | OperationStatus::Running => {}
        }
    }

    /// Put a retrying operation back on its lane.
    pub(crate) async fn requeue(&self, id: OperationId) {
        let applied = match self.table.apply(id, OperationStatus::Queued, |_| {}).await {
            Ok(applied) => applied,
            Err(err) => {
                debug!(operation_id = %id, error = %err, "Retry no longer applicable");
                return;
            }
        };
        self.note_transition(&applied);

        let lane = self.lanes.get(applied.operation.priority);
        match lane.push(id) {
            Ok(()) => self.telemetry.set_lane_depth(lane.priority(), lane.len()),
            Err(err) => warn!(operation_id = %id, error = %err, "Failed to requeue operation"),
        }
    }

    pub(crate) async fn queue_status(&self) -> QueueStatus {
        let counts = self.table.counts().await;
        QueueStatus {
            queues: self.lanes.snapshot(),
            queued: counts.queued,
            running: counts.running,
            retrying: counts.retrying,
            total_workers: self.total_workers(),
            open_circuits: self.circuits.open_count(),
        }
    }

    pub(crate) async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let inputs = MetricsInputs {
            counts: self.table.counts().await,
            queues: self.lanes.snapshot(),
            open_circuits: self.circuits.open_count(),
            total_workers: self.total_workers(),
            subscribers: self.publisher.subscriber_count(),
        };
        self.metrics.snapshot(inputs)
    }

    /// Take a metrics sample, store it and refresh the gauges.
    pub(crate) async fn sample_metrics(&self) -> MetricsSnapshot {
        let snapshot = self.metrics_snapshot().await;
        for (priority, lane) in &snapshot.queues {
            self.telemetry.set_lane_depth(*priority, lane.size);
        }
        self.telemetry
            .open_circuits
            .set(self.circuits.open_count() as i64);
        self.metrics.record_sample(snapshot.clone());
        snapshot
    }
}

/// Cloneable handle to a running operation queue.
///
/// Call [`OperationQueue::start`] inside a tokio runtime to spawn the lane
/// workers and maintenance jobs, and [`OperationQueue::shutdown`] to stop them.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

impl OperationQueue {
    /// Build a queue from a validated configuration. Workers are not started.
    pub fn new(config: EngineConfig) -> StafflaneResult<Self> {
        config.validate()?;
        let telemetry = QueueTelemetry::new()?;

        let shutdown = CancellationToken::new();
        let publisher = Arc::new(StatusPublisher::new(config.publisher.subscriber_capacity));
        let table = OperationTable::new(
            config.workers.finished_retention,
            Arc::clone(&publisher),
            shutdown.clone(),
        );
        let concurrency = config
            .workers
            .max_concurrent
            .map(|permits| Arc::new(Semaphore::new(permits)));

        let inner = QueueInner {
            lanes: Lanes::new(),
            table,
            registry: HandlerRegistry::new(),
            retry: RetryEngine::new(config.retry.clone()),
            circuits: CircuitRegistry::new(config.circuit_breaker.clone()),
            publisher,
            metrics: MetricsAggregator::new(config.metrics.clone()),
            telemetry,
            concurrency,
            shutdown,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Build a queue configured from `STAFFLANE_*` environment variables.
    pub fn from_env() -> StafflaneResult<Self> {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ========================================================================
    // HANDLERS
    // ========================================================================

    pub async fn register_handler(
        &self,
        capability: impl Into<String>,
        handler: Arc<dyn CapabilityHandler>,
    ) {
        self.inner.registry.register(capability, handler).await;
    }

    pub async fn register_fn<F, Fut>(&self, capability: impl Into<String>, func: F)
    where
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
    {
        self.inner.registry.register_fn(capability, func).await;
    }

    pub async fn unregister_handler(&self, capability: &str) -> bool {
        self.inner.registry.unregister(capability).await
    }

    pub async fn capabilities(&self) -> Vec<String> {
        self.inner.registry.capabilities().await
    }

    // ========================================================================
    // SUBMISSION AND CONTROL
    // ========================================================================

    /// Validate a request and enqueue the resulting operation.
    pub async fn submit(&self, request: OperationRequest) -> QueueResult<Operation> {
        request.validate()?;
        self.enqueue(Operation::from_request(request)).await
    }

    /// Enqueue a prepared operation on its priority lane.
    ///
    /// The operation is reset to `queued` and a `queued` event is published
    /// before its id becomes visible to workers.
    pub async fn enqueue(&self, operation: Operation) -> QueueResult<Operation> {
        if self.inner.shutdown.is_cancelled() {
            return Err(QueueError::ShutDown);
        }

        let operation = self.inner.table.insert(operation).await?;
        let lane = self.inner.lanes.get(operation.priority);
        if let Err(err) = lane.push(operation.id) {
            self.inner.table.discard(operation.id).await;
            return Err(err);
        }

        self.inner.metrics.record_submitted();
        self.inner
            .telemetry
            .record_status(operation.priority, OperationStatus::Queued);
        self.inner.telemetry.set_lane_depth(lane.priority(), lane.len());
        info!(
            operation_id = %operation.id,
            capability = %operation.capability,
            priority = %operation.priority,
            "Operation queued"
        );
        Ok(operation)
    }

    /// Cancel an operation.
    ///
    /// Queued and retrying operations are removed without running again. A
    /// running operation has its cancellation token fired and any result the
    /// handler still produces is discarded. Cancelling an already cancelled
    /// operation is a no-op; other terminal states are an error.
    pub async fn cancel(&self, id: OperationId) -> QueueResult<Operation> {
        let applied = self
            .inner
            .table
            .apply(id, OperationStatus::Cancelled, |_| {})
            .await?;

        if applied.transition == Transition::Applied {
            if applied.previous == OperationStatus::Queued {
                self.inner.lanes.get(applied.operation.priority).remove(id);
            }
            self.inner.note_transition(&applied);
            info!(operation_id = %id, previous = %applied.previous, "Operation cancelled");
        }
        Ok(applied.operation)
    }

    pub async fn get(&self, id: OperationId) -> Option<Operation> {
        self.inner.table.get(id).await
    }

    pub async fn status(&self, id: OperationId) -> Option<OperationStatus> {
        self.inner.table.status(id).await
    }

    /// Every non-terminal operation, oldest first.
    pub async fn list_active(&self) -> Vec<Operation> {
        self.inner.table.list_active().await
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    /// Subscribe to status events for `scopes`.
    ///
    /// The first event is always `initial_state`. Subscribers holding the
    /// `system` scope also receive a `queue_status` right away.
    pub async fn subscribe(&self, scopes: HashSet<Scope>) -> Subscription {
        let wants_system = scopes.contains(&Scope::System);
        let subscription = self.inner.table.subscribe(scopes).await;
        if wants_system {
            let status = self.inner.queue_status().await;
            self.inner
                .publisher
                .send_to(subscription.id, StatusEvent::queue_status(status));
        }
        subscription
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.publisher.unsubscribe(id)
    }

    pub fn set_scopes(&self, id: SubscriberId, scopes: HashSet<Scope>) -> bool {
        self.inner.publisher.set_scopes(id, scopes)
    }

    pub fn remove_scopes(&self, id: SubscriberId, scopes: &HashSet<Scope>) -> bool {
        self.inner.publisher.remove_scopes(id, scopes)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.publisher.subscriber_count()
    }

    // ========================================================================
    // OBSERVABILITY
    // ========================================================================

    pub async fn queue_status(&self) -> QueueStatus {
        self.inner.queue_status().await
    }

    /// Fresh snapshot computed now; not added to history.
    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics_snapshot().await
    }

    /// Take a sample now and add it to history.
    pub async fn sample_metrics(&self) -> MetricsSnapshot {
        self.inner.sample_metrics().await
    }

    /// Most recent sampled snapshot.
    pub fn latest_metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.latest()
    }

    pub fn watch_metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        self.inner.metrics.subscribe()
    }

    pub fn metrics_history(&self) -> MetricsHistory {
        self.inner.metrics.history()
    }

    /// Prometheus text exposition of this queue's metrics.
    pub fn render_prometheus(&self) -> QueueResult<String> {
        self.inner.telemetry.encode()
    }

    pub fn circuit_state(&self, key: &str) -> CircuitState {
        self.inner.circuits.state(key)
    }

    pub async fn health(&self) -> HealthReport {
        let counts = self.inner.table.counts().await;
        let deepest_lane = self.inner.lanes.iter().map(|l| l.len()).max().unwrap_or(0);
        HealthReport::evaluate(
            self.inner.workers_running(),
            self.inner.circuits.open_count(),
            counts.queued,
            counts.running,
            deepest_lane,
        )
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Spawn the lane workers and maintenance jobs.
    pub fn start(&self) -> QueueResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(QueueError::ShutDown);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyStarted);
        }

        let per_lane = self.inner.config.workers.workers_per_lane;
        let mut handles = Vec::with_capacity(per_lane * Priority::ALL.len() + 3);
        for priority in Priority::ALL {
            for index in 0..per_lane {
                handles.push(tokio::spawn(worker::run_lane_worker(
                    Arc::clone(&self.inner),
                    priority,
                    index,
                )));
            }
        }
        handles.push(tokio::spawn(jobs::circuit_cleanup_task(Arc::clone(
            &self.inner,
        ))));
        handles.push(tokio::spawn(jobs::queue_status_task(Arc::clone(&self.inner))));
        handles.push(tokio::spawn(jobs::metrics_sampler_task(Arc::clone(
            &self.inner,
        ))));

        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        info!(
            workers_per_lane = per_lane,
            max_concurrent = ?self.inner.config.workers.max_concurrent,
            "Operation queue started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.workers_running()
    }

    /// Stop accepting work, cancel running handlers and wait for every task.
    ///
    /// Operations still waiting in a lane stay `queued`.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!("Operation queue shutting down");
        self.inner.shutdown.cancel();
        self.inner.lanes.close();

        let handles = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Queue task ended abnormally");
            }
        }
        info!("Operation queue stopped");
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("workers_per_lane", &self.inner.config.workers.workers_per_lane)
            .field("running", &self.is_running())
            .finish()
    }
}
