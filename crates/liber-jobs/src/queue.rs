//! Per-queue priority ready-queues.
//!
//! Each named queue holds its own binary heap so backlog on one queue never
//! blocks another. Within a queue, higher-priority ready tasks dispatch
//! first; among equal priorities, submission order wins. Delayed-visibility
//! tasks (`not_before`, used for retry backoff) stay in the heap but are
//! skipped until they become ready.

use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use liber_core::{QueueName, Task};

/// Heap entry: max-heap by priority, then FIFO by submission sequence.
#[derive(Debug)]
struct QueuedTask {
    task: Task,
    seq: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first; earlier sequence first among equals.
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// In-process ready queues shared between the submitter and the worker pool.
pub struct ReadyQueues {
    heaps: Mutex<HashMap<QueueName, BinaryHeap<QueuedTask>>>,
    seq: AtomicU64,
    notify: Notify,
}

impl ReadyQueues {
    pub fn new() -> Self {
        Self {
            heaps: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueueName, BinaryHeap<QueuedTask>>> {
        self.heaps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a task on its queue and wake one waiting worker.
    pub fn push(&self, task: Task) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let queue = task.queue;
        self.lock()
            .entry(queue)
            .or_default()
            .push(QueuedTask { task, seq });
        self.notify.notify_one();
    }

    /// Pop the highest-priority ready task, scanning `queues` in order.
    ///
    /// The first queue with a ready task wins; ordering across queues is
    /// deliberately unspecified. Not-yet-visible tasks are skipped and left
    /// in place.
    pub fn pop_ready(&self, queues: &[QueueName], now: DateTime<Utc>) -> Option<Task> {
        let mut heaps = self.lock();
        for queue in queues {
            let Some(heap) = heaps.get_mut(queue) else {
                continue;
            };
            let mut delayed = Vec::new();
            let mut found = None;
            while let Some(entry) = heap.pop() {
                if entry.task.is_ready(now) {
                    found = Some(entry.task);
                    break;
                }
                delayed.push(entry);
            }
            for entry in delayed {
                heap.push(entry);
            }
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Number of tasks (ready or delayed) on one queue.
    pub fn len(&self, queue: QueueName) -> usize {
        self.lock().get(&queue).map_or(0, BinaryHeap::len)
    }

    /// Total tasks across all queues.
    pub fn total_len(&self) -> usize {
        self.lock().values().map(BinaryHeap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Await the next enqueue notification.
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }
}

impl Default for ReadyQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn task(queue: QueueName, priority: u8) -> Task {
        Task {
            id: Uuid::new_v4(),
            name: "t".into(),
            queue,
            priority,
            payload: json!({}),
            retry_count: 0,
            max_retries: 3,
            enqueued_at: Utc::now(),
            not_before: None,
        }
    }

    #[test]
    fn test_priority_order_within_queue() {
        let queues = ReadyQueues::new();
        let low = task(QueueName::Recommendations, 1);
        let high = task(QueueName::Recommendations, 9);
        let mid = task(QueueName::Recommendations, 5);
        queues.push(low.clone());
        queues.push(high.clone());
        queues.push(mid.clone());

        let now = Utc::now();
        let order: Vec<Uuid> = std::iter::from_fn(|| {
            queues
                .pop_ready(&[QueueName::Recommendations], now)
                .map(|t| t.id)
        })
        .collect();
        assert_eq!(order, vec![high.id, mid.id, low.id]);
    }

    #[test]
    fn test_fifo_among_equal_priorities() {
        let queues = ReadyQueues::new();
        let first = task(QueueName::Default, 5);
        let second = task(QueueName::Default, 5);
        queues.push(first.clone());
        queues.push(second.clone());

        let now = Utc::now();
        assert_eq!(
            queues.pop_ready(&[QueueName::Default], now).unwrap().id,
            first.id
        );
        assert_eq!(
            queues.pop_ready(&[QueueName::Default], now).unwrap().id,
            second.id
        );
    }

    #[test]
    fn test_queues_are_independent() {
        let queues = ReadyQueues::new();
        let heavy = task(QueueName::HeavyComputation, 9);
        let notif = task(QueueName::Notifications, 1);
        queues.push(heavy.clone());
        queues.push(notif.clone());

        let now = Utc::now();
        // A worker scanning only notifications is not blocked by the
        // heavy-computation backlog.
        assert_eq!(
            queues
                .pop_ready(&[QueueName::Notifications], now)
                .unwrap()
                .id,
            notif.id
        );
        assert_eq!(queues.len(QueueName::HeavyComputation), 1);
    }

    #[test]
    fn test_delayed_task_skipped_until_visible() {
        let queues = ReadyQueues::new();
        let now = Utc::now();

        let mut delayed = task(QueueName::Default, 9);
        delayed.not_before = Some(now + chrono::Duration::seconds(60));
        let ready = task(QueueName::Default, 1);
        queues.push(delayed.clone());
        queues.push(ready.clone());

        // The delayed high-priority task does not shadow the ready one.
        assert_eq!(
            queues.pop_ready(&[QueueName::Default], now).unwrap().id,
            ready.id
        );
        assert!(queues.pop_ready(&[QueueName::Default], now).is_none());
        assert_eq!(queues.len(QueueName::Default), 1);

        let later = now + chrono::Duration::seconds(61);
        assert_eq!(
            queues.pop_ready(&[QueueName::Default], later).unwrap().id,
            delayed.id
        );
    }

    #[test]
    fn test_empty_pop_returns_none() {
        let queues = ReadyQueues::new();
        assert!(queues
            .pop_ready(&QueueName::ALL, Utc::now())
            .is_none());
        assert!(queues.is_empty());
    }
}
