//! Priority lanes
//!
//! One FIFO lane per priority. Producers push ids, workers of that lane pop
//! them. A lane never holds the same id twice.

use serde::{Deserialize, Serialize};
use stafflane_core::{OperationId, Priority, QueueError, QueueResult};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// An id waiting in a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneEntry {
    pub id: OperationId,
    pub enqueued_at: Instant,
}

/// Size and wait times of one lane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaneSnapshot {
    pub size: usize,
    pub avg_wait_ms: u64,
    pub oldest_wait_ms: u64,
}

#[derive(Debug, Default)]
struct LaneState {
    entries: VecDeque<LaneEntry>,
    ids: HashSet<OperationId>,
    closed: bool,
}

/// FIFO lane for a single priority.
#[derive(Debug)]
pub struct Lane {
    priority: Priority,
    state: Mutex<LaneState>,
    notify: Notify,
}

impl Lane {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            state: Mutex::new(LaneState::default()),
            notify: Notify::new(),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    fn state(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an id to the back of the lane.
    pub fn push(&self, id: OperationId) -> QueueResult<()> {
        {
            let mut state = self.state();
            if state.closed {
                return Err(QueueError::ShutDown);
            }
            if !state.ids.insert(id) {
                return Err(QueueError::Duplicate { id });
            }
            state.entries.push_back(LaneEntry {
                id,
                enqueued_at: Instant::now(),
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the front entry without waiting.
    pub fn try_dequeue(&self) -> Option<LaneEntry> {
        let mut state = self.state();
        let entry = state.entries.pop_front()?;
        state.ids.remove(&entry.id);
        Some(entry)
    }

    /// Wait for the next entry. Returns `None` once the lane is closed or
    /// `shutdown` fires.
    pub async fn dequeue(&self, shutdown: &CancellationToken) -> Option<LaneEntry> {
        loop {
            if let Some(entry) = self.try_dequeue() {
                return Some(entry);
            }
            if self.is_closed() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.cancelled() => return None,
            }
        }
    }

    /// Remove a waiting id. Returns whether it was present.
    pub fn remove(&self, id: OperationId) -> bool {
        let mut state = self.state();
        if !state.ids.remove(&id) {
            return false;
        }
        state.entries.retain(|entry| entry.id != id);
        true
    }

    pub fn contains(&self, id: OperationId) -> bool {
        self.state().ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting ids and wake every waiting worker.
    pub fn close(&self) {
        self.state().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn snapshot(&self) -> LaneSnapshot {
        let now = Instant::now();
        let state = self.state();
        let size = state.entries.len();
        if size == 0 {
            return LaneSnapshot::default();
        }
        let waits = state
            .entries
            .iter()
            .map(|entry| now.saturating_duration_since(entry.enqueued_at));
        let total: Duration = waits.clone().sum();
        let oldest = waits.max().unwrap_or_default();
        LaneSnapshot {
            size,
            avg_wait_ms: (total / size as u32).as_millis() as u64,
            oldest_wait_ms: oldest.as_millis() as u64,
        }
    }
}

/// The three lanes, addressed by priority.
#[derive(Debug)]
pub struct Lanes {
    high: Lane,
    normal: Lane,
    low: Lane,
}

impl Default for Lanes {
    fn default() -> Self {
        Self::new()
    }
}

impl Lanes {
    pub fn new() -> Self {
        Self {
            high: Lane::new(Priority::High),
            normal: Lane::new(Priority::Normal),
            low: Lane::new(Priority::Low),
        }
    }

    pub fn get(&self, priority: Priority) -> &Lane {
        match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lane> {
        [&self.high, &self.normal, &self.low].into_iter()
    }

    pub fn total_len(&self) -> usize {
        self.iter().map(Lane::len).sum()
    }

    pub fn close(&self) {
        self.iter().for_each(Lane::close);
    }

    pub fn snapshot(&self) -> BTreeMap<Priority, LaneSnapshot> {
        self.iter()
            .map(|lane| (lane.priority(), lane.snapshot()))
            .collect()
    }
}
