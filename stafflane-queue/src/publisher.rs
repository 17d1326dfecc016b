//! Status Publisher
//!
//! Fans events out to subscribers through bounded per-subscriber channels.
//! Delivery never blocks: a subscriber whose channel is full or closed is
//! dropped.

use crate::events::{OperationEvent, StatusEvent};
use dashmap::DashMap;
use stafflane_core::{Operation, Scope};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of a subscriber.
pub type SubscriberId = Uuid;

/// Receiving side of a subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<StatusEvent>,
}

#[derive(Debug)]
struct Subscriber {
    scopes: HashSet<Scope>,
    sender: mpsc::Sender<StatusEvent>,
}

impl Subscriber {
    fn wants_operation(&self, op: &Operation) -> bool {
        self.scopes.iter().any(|scope| scope.matches_operation(op))
    }

    fn wants_system(&self) -> bool {
        self.scopes.contains(&Scope::System)
    }
}

/// Registry of subscribers and their scopes.
#[derive(Debug)]
pub struct StatusPublisher {
    subscribers: DashMap<SubscriberId, Subscriber>,
    capacity: usize,
    delivered: AtomicU64,
    dropped_subscribers: AtomicU64,
}

impl StatusPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            capacity: capacity.max(1),
            delivered: AtomicU64::new(0),
            dropped_subscribers: AtomicU64::new(0),
        }
    }

    /// Register a subscriber with the given scopes.
    pub fn subscribe(&self, scopes: HashSet<Scope>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = Uuid::now_v7();
        debug!(subscriber_id = %id, scopes = scopes.len(), "Subscriber registered");
        self.subscribers.insert(id, Subscriber { scopes, sender });
        Subscription { id, receiver }
    }

    /// Remove a subscriber. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber_id = %id, "Subscriber removed");
        }
        removed
    }

    /// Replace a subscriber's scope set.
    pub fn set_scopes(&self, id: SubscriberId, scopes: HashSet<Scope>) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(mut subscriber) => {
                subscriber.scopes = scopes;
                true
            }
            None => false,
        }
    }

    /// Remove the given scopes, or every scope when `scopes` is empty.
    pub fn remove_scopes(&self, id: SubscriberId, scopes: &HashSet<Scope>) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(mut subscriber) => {
                if scopes.is_empty() {
                    subscriber.scopes.clear();
                } else {
                    subscriber.scopes.retain(|scope| !scopes.contains(scope));
                }
                true
            }
            None => false,
        }
    }

    pub fn scopes(&self, id: SubscriberId) -> Option<HashSet<Scope>> {
        self.subscribers.get(&id).map(|s| s.scopes.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total messages handed to subscriber channels.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Subscribers dropped after a failed delivery.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_subscribers.load(Ordering::Relaxed)
    }

    /// Publish an operation event to every subscriber whose scopes match.
    pub fn publish(&self, kind: OperationEvent, op: &Operation) {
        let event = StatusEvent::operation_event(kind, op.clone());
        self.fan_out(&event, |subscriber| subscriber.wants_operation(op));
    }

    /// Publish a system event (queue status) to `system` subscribers.
    pub fn publish_system(&self, event: StatusEvent) {
        self.fan_out(&event, Subscriber::wants_system);
    }

    /// Deliver an event to a single subscriber.
    pub fn send_to(&self, id: SubscriberId, event: StatusEvent) -> bool {
        let result = match self.subscribers.get(&id) {
            Some(subscriber) => subscriber.sender.try_send(event),
            None => return false,
        };
        match result {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                self.drop_subscriber(id, &err);
                false
            }
        }
    }

    fn fan_out(&self, event: &StatusEvent, wants: impl Fn(&Subscriber) -> bool) {
        let mut failed = Vec::new();
        for entry in self.subscribers.iter() {
            if !wants(entry.value()) {
                continue;
            }
            match entry.value().sender.try_send(event.clone()) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => failed.push((*entry.key(), err)),
            }
        }
        // Removal happens after iteration; DashMap shards are still read-locked inside the loop.
        for (id, err) in failed {
            self.drop_subscriber(id, &err);
        }
    }

    fn drop_subscriber(&self, id: SubscriberId, err: &TrySendError<StatusEvent>) {
        if self.subscribers.remove(&id).is_none() {
            return;
        }
        self.dropped_subscribers.fetch_add(1, Ordering::Relaxed);
        let reason = match err {
            TrySendError::Full(_) => "channel full",
            TrySendError::Closed(_) => "channel closed",
        };
        warn!(subscriber_id = %id, reason, "Dropping subscriber after failed delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::QueueStatus;
    use stafflane_core::{parse_scopes, Priority};

    fn scopes(input: &str) -> HashSet<Scope> {
        parse_scopes(input).unwrap()
    }

    #[tokio::test]
    async fn test_publish_respects_scopes() {
        let publisher = StatusPublisher::new(8);
        let mut all = publisher.subscribe(scopes("all"));
        let mut p1 = publisher.subscribe(scopes("project:p1"));
        let mut p2 = publisher.subscribe(scopes("project:p2"));
        let mut agent = publisher.subscribe(scopes("agent:a1"));

        let op = Operation::new("p1", "a1", "echo", Priority::Normal);
        publisher.publish(OperationEvent::Queued, &op);

        assert_eq!(all.receiver.try_recv().unwrap().event_type(), "queued");
        assert!(p1.receiver.try_recv().is_ok());
        assert!(agent.receiver.try_recv().is_ok());
        assert!(p2.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_system_events_only_reach_system_subscribers() {
        let publisher = StatusPublisher::new(8);
        let mut system = publisher.subscribe(scopes("system"));
        let mut all = publisher.subscribe(scopes("all"));

        publisher.publish_system(StatusEvent::queue_status(QueueStatus::default()));

        assert_eq!(system.receiver.try_recv().unwrap().event_type(), "queue_status");
        assert!(all.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_subscriber_is_removed() {
        let publisher = StatusPublisher::new(1);
        let slow = publisher.subscribe(scopes("all"));
        let op = Operation::new("p1", "a1", "echo", Priority::Normal);

        publisher.publish(OperationEvent::Queued, &op);
        publisher.publish(OperationEvent::Running, &op);

        assert_eq!(publisher.subscriber_count(), 0);
        assert_eq!(publisher.dropped_count(), 1);
        drop(slow);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_removed() {
        let publisher = StatusPublisher::new(4);
        let sub = publisher.subscribe(scopes("all"));
        drop(sub.receiver);

        let op = Operation::new("p1", "a1", "echo", Priority::Normal);
        publisher.publish(OperationEvent::Queued, &op);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_scope_updates() {
        let publisher = StatusPublisher::new(4);
        let sub = publisher.subscribe(scopes("all,system"));

        assert!(publisher.remove_scopes(sub.id, &scopes("system")));
        assert_eq!(publisher.scopes(sub.id).unwrap(), scopes("all"));

        assert!(publisher.set_scopes(sub.id, scopes("agent:a9")));
        assert_eq!(publisher.scopes(sub.id).unwrap(), scopes("agent:a9"));

        assert!(publisher.remove_scopes(sub.id, &HashSet::new()));
        assert!(publisher.scopes(sub.id).unwrap().is_empty());

        assert!(publisher.unsubscribe(sub.id));
        assert!(!publisher.set_scopes(sub.id, scopes("all")));
    }
}
