//! Operation table
//!
//! Owns every operation the queue knows about: the active working set and a
//! bounded ring of recently finished operations. All status changes go
//! through [`OperationTable::apply`], which enforces the state machine and
//! publishes the matching event while still holding the write lock, so
//! subscribers observe transitions in the order they were applied.

use crate::events::{OperationEvent, StatusEvent};
use crate::publisher::{StatusPublisher, Subscription};
use stafflane_core::{
    Operation, OperationId, OperationStatus, Priority, QueueError, QueueResult, Scope, Transition,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveEntry {
    operation: Operation,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct FinishedRing {
    order: VecDeque<OperationId>,
    operations: HashMap<OperationId, Operation>,
    capacity: usize,
}

impl FinishedRing {
    fn push(&mut self, op: Operation) {
        if self.capacity == 0 {
            return;
        }
        if self.operations.insert(op.id, op.clone()).is_none() {
            self.order.push_back(op.id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.operations.remove(&oldest);
            }
        }
    }
}

/// Outcome of an applied status change.
#[derive(Debug, Clone)]
pub struct Applied {
    pub transition: Transition,
    pub previous: OperationStatus,
    pub operation: Operation,
}

/// Counts over the active working set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveCounts {
    pub queued: usize,
    pub running: usize,
    pub retrying: usize,
    pub by_priority: BTreeMap<Priority, usize>,
}

impl ActiveCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.retrying
    }
}

/// Active and recently finished operations.
pub struct OperationTable {
    active: RwLock<HashMap<OperationId, ActiveEntry>>,
    finished: RwLock<FinishedRing>,
    publisher: Arc<StatusPublisher>,
    shutdown: CancellationToken,
}

impl OperationTable {
    /// Per-operation cancellation tokens are children of `shutdown`.
    pub fn new(
        finished_retention: usize,
        publisher: Arc<StatusPublisher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            finished: RwLock::new(FinishedRing {
                capacity: finished_retention,
                ..FinishedRing::default()
            }),
            publisher,
            shutdown,
        }
    }

    /// Insert a new operation as QUEUED and publish `queued`.
    pub async fn insert(&self, mut op: Operation) -> QueueResult<Operation> {
        let mut active = self.active.write().await;
        if active.contains_key(&op.id)
            || self.finished.read().await.operations.contains_key(&op.id)
        {
            return Err(QueueError::Duplicate { id: op.id });
        }
        op.status = OperationStatus::Queued;
        self.publisher.publish(OperationEvent::Queued, &op);
        active.insert(
            op.id,
            ActiveEntry {
                operation: op.clone(),
                cancel: self.shutdown.child_token(),
            },
        );
        Ok(op)
    }

    /// Remove an operation that never reached a lane.
    pub async fn discard(&self, id: OperationId) -> Option<Operation> {
        self.active.write().await.remove(&id).map(|e| e.operation)
    }

    /// Move `id` to `next`, running `mutate` first.
    ///
    /// `mutate` only runs when the transition is legal. Moving into a
    /// terminal status fires the operation's cancellation token and moves
    /// it to the finished ring. Re-applying a terminal status is reported as
    /// [`Transition::Unchanged`] and publishes nothing.
    pub async fn apply(
        &self,
        id: OperationId,
        next: OperationStatus,
        mutate: impl FnOnce(&mut Operation),
    ) -> QueueResult<Applied> {
        let mut active = self.active.write().await;
        let Some(entry) = active.get_mut(&id) else {
            drop(active);
            return self.finished_outcome(id, next).await;
        };

        let previous = entry.operation.status;
        if !previous.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id,
                from: previous,
                to: next,
            });
        }
        mutate(&mut entry.operation);
        entry.operation.transition_to(next)?;
        let snapshot = entry.operation.clone();
        self.publisher
            .publish(OperationEvent::for_status(next), &snapshot);

        if next.is_terminal() {
            if let Some(entry) = active.remove(&id) {
                entry.cancel.cancel();
                self.finished.write().await.push(entry.operation);
            }
        }

        Ok(Applied {
            transition: Transition::Applied,
            previous,
            operation: snapshot,
        })
    }

    async fn finished_outcome(
        &self,
        id: OperationId,
        next: OperationStatus,
    ) -> QueueResult<Applied> {
        let finished = self.finished.read().await;
        match finished.operations.get(&id) {
            Some(op) if op.status == next => Ok(Applied {
                transition: Transition::Unchanged,
                previous: op.status,
                operation: op.clone(),
            }),
            Some(op) => Err(QueueError::InvalidTransition {
                id,
                from: op.status,
                to: next,
            }),
            None => Err(QueueError::NotFound { id }),
        }
    }

    /// Claim a QUEUED operation for execution.
    ///
    /// Returns the RUNNING snapshot and its cancellation token, or `None` if
    /// the operation is gone or no longer QUEUED.
    pub async fn begin_run(&self, id: OperationId) -> Option<(Operation, CancellationToken)> {
        let token = {
            let active = self.active.read().await;
            let entry = active.get(&id)?;
            if entry.operation.status != OperationStatus::Queued {
                return None;
            }
            entry.cancel.clone()
        };
        let applied = self.apply(id, OperationStatus::Running, |_| {}).await.ok()?;
        Some((applied.operation, token))
    }

    /// Update progress of a RUNNING operation and publish `progress`.
    pub async fn set_progress(&self, id: OperationId, progress: f64) -> Option<Operation> {
        let mut active = self.active.write().await;
        let entry = active.get_mut(&id)?;
        if entry.operation.status != OperationStatus::Running {
            return None;
        }
        entry.operation.set_progress(progress);
        let snapshot = entry.operation.clone();
        self.publisher.publish(OperationEvent::Progress, &snapshot);
        Some(snapshot)
    }

    /// Look up an operation, active or recently finished.
    pub async fn get(&self, id: OperationId) -> Option<Operation> {
        if let Some(entry) = self.active.read().await.get(&id) {
            return Some(entry.operation.clone());
        }
        self.finished.read().await.operations.get(&id).cloned()
    }

    pub async fn status(&self, id: OperationId) -> Option<OperationStatus> {
        self.get(id).await.map(|op| op.status)
    }

    /// Active operations, oldest first.
    pub async fn list_active(&self) -> Vec<Operation> {
        let mut ops: Vec<_> = self
            .active
            .read()
            .await
            .values()
            .map(|e| e.operation.clone())
            .collect();
        ops.sort_by_key(|op| (op.created_at, op.id));
        ops
    }

    pub async fn counts(&self) -> ActiveCounts {
        let active = self.active.read().await;
        let mut counts = ActiveCounts {
            by_priority: Priority::ALL.iter().map(|p| (*p, 0)).collect(),
            ..ActiveCounts::default()
        };
        for entry in active.values() {
            match entry.operation.status {
                OperationStatus::Queued => counts.queued += 1,
                OperationStatus::Running => counts.running += 1,
                OperationStatus::Retrying => counts.retrying += 1,
                _ => {}
            }
            *counts.by_priority.entry(entry.operation.priority).or_default() += 1;
        }
        counts
    }

    /// Register a subscriber and send it the matching active operations.
    ///
    /// Runs under the table read lock so no transition event can reach the
    /// subscriber ahead of its `initial_state` message.
    pub async fn subscribe(&self, scopes: HashSet<Scope>) -> Subscription {
        let active = self.active.read().await;
        let mut operations: Vec<_> = active
            .values()
            .filter(|e| scopes.iter().any(|s| s.matches_operation(&e.operation)))
            .map(|e| e.operation.clone())
            .collect();
        operations.sort_by_key(|op| (op.created_at, op.id));
        let subscription = self.publisher.subscribe(scopes);
        self.publisher
            .send_to(subscription.id, StatusEvent::initial_state(operations));
        drop(active);
        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stafflane_core::parse_scopes;

    fn table(retention: usize) -> (OperationTable, Arc<StatusPublisher>) {
        let publisher = Arc::new(StatusPublisher::new(64));
        let table = OperationTable::new(retention, publisher.clone(), CancellationToken::new());
        (table, publisher)
    }

    fn op() -> Operation {
        Operation::new("p1", "a1", "echo", Priority::Normal)
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let (table, _) = table(10);
        let op = op();
        table.insert(op.clone()).await.unwrap();
        assert!(matches!(
            table.insert(op).await,
            Err(QueueError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_terminal_moves_to_finished() {
        let (table, _) = table(10);
        let id = table.insert(op()).await.unwrap().id;
        let (_, token) = table.begin_run(id).await.unwrap();
        let applied = table
            .apply(id, OperationStatus::Completed, |op| {
                op.result = Some(serde_json::json!({"ok": true}))
            })
            .await
            .unwrap();
        assert_eq!(applied.previous, OperationStatus::Running);
        assert!(token.is_cancelled());
        assert!(table.list_active().await.is_empty());
        let finished = table.get(id).await.unwrap();
        assert_eq!(finished.status, OperationStatus::Completed);
        assert_eq!(finished.progress, 100.0);
    }

    #[tokio::test]
    async fn test_repeated_terminal_is_unchanged_and_silent() {
        let (table, publisher) = table(10);
        let mut sub = publisher.subscribe(parse_scopes("all").unwrap());
        let id = table.insert(op()).await.unwrap().id;

        let first = table.apply(id, OperationStatus::Cancelled, |_| {}).await.unwrap();
        let second = table.apply(id, OperationStatus::Cancelled, |_| {}).await.unwrap();
        assert_eq!(first.transition, Transition::Applied);
        assert_eq!(second.transition, Transition::Unchanged);

        assert_eq!(sub.receiver.try_recv().unwrap().event_type(), "queued");
        assert_eq!(sub.receiver.try_recv().unwrap().event_type(), "cancelled");
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_begin_run_skips_cancelled() {
        let (table, _) = table(10);
        let id = table.insert(op()).await.unwrap().id;
        table.apply(id, OperationStatus::Cancelled, |_| {}).await.unwrap();
        assert!(table.begin_run(id).await.is_none());
    }

    #[tokio::test]
    async fn test_mutation_skipped_on_illegal_transition() {
        let (table, _) = table(10);
        let id = table.insert(op()).await.unwrap().id;
        let err = table
            .apply(id, OperationStatus::Completed, |op| op.error = Some("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));
        assert!(table.get(id).await.unwrap().error.is_none());
    }

    #[tokio::test]
    async fn test_finished_ring_is_bounded() {
        let (table, _) = table(2);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = table.insert(op()).await.unwrap().id;
            table.apply(id, OperationStatus::Cancelled, |_| {}).await.unwrap();
            ids.push(id);
        }
        assert!(table.get(ids[0]).await.is_none());
        assert!(table.get(ids[1]).await.is_some());
        assert!(table.get(ids[2]).await.is_some());
    }

    #[tokio::test]
    async fn test_subscribe_sends_initial_state_first() {
        let (table, _) = table(10);
        table.insert(op()).await.unwrap();
        table
            .insert(Operation::new("p2", "a2", "echo", Priority::Low))
            .await
            .unwrap();

        let mut sub = table.subscribe(parse_scopes("project:p1").unwrap()).await;
        match sub.receiver.try_recv().unwrap() {
            StatusEvent::InitialState { operations, .. } => {
                assert_eq!(operations.len(), 1);
                assert_eq!(operations[0].project_id, "p1");
            }
            other => panic!("unexpected event {}", other.event_type()),
        }
    }

    #[tokio::test]
    async fn test_progress_only_while_running() {
        let (table, _) = table(10);
        let id = table.insert(op()).await.unwrap().id;
        assert!(table.set_progress(id, 50.0).await.is_none());
        table.begin_run(id).await.unwrap();
        assert_eq!(table.set_progress(id, 150.0).await.unwrap().progress, 100.0);
    }

    #[tokio::test]
    async fn test_counts() {
        let (table, _) = table(10);
        let a = table.insert(op()).await.unwrap().id;
        table
            .insert(Operation::new("p1", "a1", "echo", Priority::High))
            .await
            .unwrap();
        table.begin_run(a).await.unwrap();
        let counts = table.counts().await;
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.by_priority[&Priority::High], 1);
        assert_eq!(counts.by_priority[&Priority::Low], 0);
        assert_eq!(counts.total(), 2);
    }
}
