//! Dispatch queue — concurrency-safe minimum-priority queue of pending items.
//!
//! Ordering key is `(priority_score, sequence)`. The sequence number is
//! assigned under the same lock as the insertion, so two items with equal
//! scores dispatch in enqueue order and payloads are never compared.
//!
//! `pop_due` and `remove` each run under one lock acquisition. Draining
//! and re-inserting from the caller side would open a race window with
//! concurrent `push`/`remove`, so those stay internal.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::item::ScheduledItem;

struct QueueEntry {
    score: i32,
    seq: u64,
    item: ScheduledItem,
}

impl QueueEntry {
    fn key(&self) -> (i32, u64) {
        (self.score, self.seq)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Reversed so the std max-heap pops the smallest key first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

struct QueueInner {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

/// Minimum-priority queue of pending dispatch items.
pub struct DispatchQueue {
    inner: Mutex<QueueInner>,
}

impl DispatchQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Insert an item, assigning its sequence number atomically.
    pub async fn push(&self, item: ScheduledItem) {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueueEntry {
            score: item.priority_score,
            seq,
            item,
        });
    }

    /// Atomically remove and return every item with `scheduled_at <= now`,
    /// in ascending `(priority_score, sequence)` order. Not-yet-due items
    /// stay in place.
    pub async fn pop_due(&self, now: DateTime<Utc>) -> Vec<ScheduledItem> {
        let mut inner = self.inner.lock().await;

        let mut due = Vec::new();
        let mut rest = Vec::new();
        for entry in inner.heap.drain() {
            if entry.item.scheduled_at <= now {
                due.push(entry);
            } else {
                rest.push(entry);
            }
        }
        inner.heap.extend(rest);

        due.sort_by_key(|e| e.key());
        due.into_iter().map(|e| e.item).collect()
    }

    /// Atomically remove the item with the given ID, if still queued.
    pub async fn remove(&self, id: Uuid) -> Option<ScheduledItem> {
        let mut inner = self.inner.lock().await;

        let mut removed = None;
        let mut rest = Vec::new();
        for entry in inner.heap.drain() {
            if removed.is_none() && entry.item.id == id {
                removed = Some(entry.item);
            } else {
                rest.push(entry);
            }
        }
        inner.heap.extend(rest);

        removed
    }

    /// Non-destructive copy of all queued items, in dispatch order.
    pub async fn snapshot(&self) -> Vec<ScheduledItem> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<(i32, u64, ScheduledItem)> = inner
            .heap
            .iter()
            .map(|e| (e.score, e.seq, e.item.clone()))
            .collect();
        entries.sort_by_key(|(score, seq, _)| (*score, *seq));
        entries.into_iter().map(|(_, _, item)| item).collect()
    }

    /// Number of queued items.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    /// Check if the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.heap.is_empty()
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{ComposedResponse, PriorityTier, ResponseKind};
    use crate::scheduler::evaluator::TimingDecision;

    fn make_item(score: i32, scheduled_at: DateTime<Utc>) -> ScheduledItem {
        let response = ComposedResponse::new(
            "user@example.com",
            "Re: ticket",
            "body",
            PriorityTier::Medium,
            ResponseKind::Acknowledgment,
        );
        let decision = TimingDecision {
            scheduled_at,
            priority_score: score,
            applied_rule: "immediate".into(),
        };
        ScheduledItem::new(response, &decision, 3)
    }

    #[tokio::test]
    async fn pop_due_orders_by_score() {
        let queue = DispatchQueue::new();
        let now = Utc::now();

        queue.push(make_item(50, now)).await;
        queue.push(make_item(10, now)).await;
        queue.push(make_item(25, now)).await;

        let due = queue.pop_due(now).await;
        let scores: Vec<i32> = due.iter().map(|i| i.priority_score).collect();
        assert_eq!(scores, vec![10, 25, 50]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn equal_scores_dispatch_in_enqueue_order() {
        let queue = DispatchQueue::new();
        let now = Utc::now();

        let first = make_item(50, now);
        let second = make_item(50, now);
        let third = make_item(50, now);
        let ids = vec![first.id, second.id, third.id];

        queue.push(first).await;
        queue.push(second).await;
        queue.push(third).await;

        let due = queue.pop_due(now).await;
        let popped: Vec<Uuid> = due.iter().map(|i| i.id).collect();
        assert_eq!(popped, ids);
    }

    #[tokio::test]
    async fn pop_due_leaves_future_items() {
        let queue = DispatchQueue::new();
        let now = Utc::now();
        let later = now + chrono::Duration::minutes(10);

        queue.push(make_item(10, later)).await;
        queue.push(make_item(50, now)).await;

        let due = queue.pop_due(now).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].priority_score, 50);
        assert_eq!(queue.len().await, 1);

        // Becomes due once its time has elapsed
        let due = queue.pop_due(later).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].priority_score, 10);
    }

    #[tokio::test]
    async fn remove_by_id() {
        let queue = DispatchQueue::new();
        let now = Utc::now();

        let item = make_item(50, now);
        let id = item.id;
        queue.push(item).await;
        queue.push(make_item(10, now)).await;

        let removed = queue.remove(id).await;
        assert_eq!(removed.map(|i| i.id), Some(id));
        assert_eq!(queue.len().await, 1);

        // Second removal finds nothing
        assert!(queue.remove(id).await.is_none());
    }

    #[tokio::test]
    async fn snapshot_is_non_destructive() {
        let queue = DispatchQueue::new();
        let now = Utc::now();

        queue.push(make_item(50, now)).await;
        queue.push(make_item(10, now)).await;

        let snap = queue.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].priority_score, 10);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn reinserted_item_keeps_priority_order() {
        let queue = DispatchQueue::new();
        let now = Utc::now();

        let due = make_item(50, now);
        queue.push(due).await;

        let popped = queue.pop_due(now).await;
        assert_eq!(popped.len(), 1);

        // Re-push (retry path) then add a higher-priority item
        for item in popped {
            queue.push(item).await;
        }
        queue.push(make_item(10, now)).await;

        let due = queue.pop_due(now).await;
        assert_eq!(due[0].priority_score, 10);
        assert_eq!(due[1].priority_score, 50);
    }

    #[tokio::test]
    async fn concurrent_pushes_all_land() {
        let queue = std::sync::Arc::new(DispatchQueue::new());
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = std::sync::Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    queue.push(make_item(50, now)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.len().await, 200);
        let due = queue.pop_due(now).await;
        assert_eq!(due.len(), 200);
    }
}
