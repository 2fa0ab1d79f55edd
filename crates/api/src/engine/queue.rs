//! Priority-ordered work queue.
//!
//! Entries are ordered by `(priority desc, sequence asc)`: higher priority
//! dispatches first, ties go to whoever enqueued first. A membership set
//! guarantees at most one live entry per job id, which is what makes
//! double-dispatch impossible under concurrent `enqueue`/`dequeue_next`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::Utc;
use foreman_core::types::{JobId, Timestamp};
use tokio::sync::Mutex;

/// A reference to a job awaiting assignment.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub priority: i32,
    pub enqueued_at: Timestamp,
    /// Monotonic tie-breaker assigned at enqueue time. Timestamps can
    /// collide; this cannot.
    seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority wins, then lower seq
        // (earlier enqueue) wins.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueInner {
    heap: BinaryHeap<QueueEntry>,
    queued: HashSet<JobId>,
}

/// Mutex-protected priority queue, shared via `Arc`.
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    next_seq: AtomicU64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                queued: HashSet::new(),
            }),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Insert a job reference. Returns `false` (and does nothing) if the
    /// job already has a live entry.
    pub async fn enqueue(&self, job_id: JobId, priority: i32) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.queued.insert(job_id) {
            return false;
        }
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        inner.heap.push(QueueEntry {
            job_id,
            priority,
            enqueued_at: Utc::now(),
            seq,
        });
        true
    }

    /// Remove and return the highest-priority entry, or `None` when empty.
    pub async fn dequeue_next(&self) -> Option<QueueEntry> {
        let mut inner = self.inner.lock().await;
        let entry = inner.heap.pop()?;
        inner.queued.remove(&entry.job_id);
        Some(entry)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.heap.is_empty()
    }

    /// Whether a live entry exists for this job.
    pub async fn contains(&self, job_id: JobId) -> bool {
        self.inner.lock().await.queued.contains(&job_id)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn dequeue_on_empty_queue_is_none() {
        let queue = WorkQueue::new();
        assert!(queue.dequeue_next().await.is_none());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let queue = WorkQueue::new();
        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        queue.enqueue(low, 0).await;
        queue.enqueue(high, 10).await;

        assert_eq!(queue.dequeue_next().await.unwrap().job_id, high);
        assert_eq!(queue.dequeue_next().await.unwrap().job_id, low);
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let queue = WorkQueue::new();
        let ids: Vec<JobId> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(*id, 0).await;
        }
        for expected in &ids {
            assert_eq!(queue.dequeue_next().await.unwrap().job_id, *expected);
        }
    }

    #[tokio::test]
    async fn negative_priorities_sort_last() {
        let queue = WorkQueue::new();
        let background = Uuid::new_v4();
        let normal = Uuid::new_v4();
        queue.enqueue(background, -10).await;
        queue.enqueue(normal, 0).await;

        assert_eq!(queue.dequeue_next().await.unwrap().job_id, normal);
        assert_eq!(queue.dequeue_next().await.unwrap().job_id, background);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected() {
        let queue = WorkQueue::new();
        let id = Uuid::new_v4();
        assert!(queue.enqueue(id, 0).await);
        assert!(!queue.enqueue(id, 5).await);
        assert_eq!(queue.len().await, 1);

        // Once dequeued, the job may be enqueued again (requeue on
        // reclaim).
        queue.dequeue_next().await.unwrap();
        assert!(queue.enqueue(id, 0).await);
    }

    #[tokio::test]
    async fn concurrent_enqueue_dequeue_never_duplicates() {
        let queue = Arc::new(WorkQueue::new());
        let ids: Vec<JobId> = (0..200).map(|_| Uuid::new_v4()).collect();

        // Four producers race to enqueue the same 200 ids; only one entry
        // per id may ever be live.
        let mut producers = Vec::new();
        for p in 0..4 {
            let queue = Arc::clone(&queue);
            let ids = ids.clone();
            producers.push(tokio::spawn(async move {
                for (i, id) in ids.iter().enumerate() {
                    queue.enqueue(*id, ((i + p) % 7) as i32).await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        // Two consumers drain concurrently.
        let mut consumers = Vec::new();
        for _ in 0..2 {
            let queue = Arc::clone(&queue);
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(entry) = queue.dequeue_next().await {
                    seen.push(entry.job_id);
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }

        assert_eq!(all.len(), ids.len(), "every id dequeued exactly once");
        let unique: HashSet<JobId> = all.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
