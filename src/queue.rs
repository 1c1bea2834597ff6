//! Thread-safe priority queue of pending jobs with anti-starvation aging
//! (spec §4.1).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use priority_queue::PriorityQueue;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ordering key: effective priority first, then earliest-enqueued-first on
/// ties. `PriorityQueue` is a max-heap over `Ord`, so we store the negated
/// nanosecond timestamp — the earliest timestamp yields the largest second
/// field and therefore sorts ahead of later arrivals at equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct JobKey(i64, i64);

impl JobKey {
    fn new(effective_priority: i64, enqueued_at: DateTime<Utc>) -> Self {
        let nanos = enqueued_at.timestamp_nanos_opt().unwrap_or(0);
        JobKey(effective_priority, nanos.saturating_neg())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    job_id: String,
    base_priority: i64,
    enqueued_at: DateTime<Utc>,
    aging_boost: i64,
}

impl Entry {
    fn effective_priority(&self) -> i64 {
        self.base_priority.saturating_add(self.aging_boost)
    }

    fn key(&self) -> JobKey {
        JobKey::new(self.effective_priority(), self.enqueued_at)
    }
}

struct Inner {
    heap: PriorityQueue<String, JobKey>,
    entries: HashMap<String, Entry>,
    capacity: usize,
}

/// A thread-safe max-heap of pending job ids, keyed by effective priority
/// with FIFO tiebreak (spec §4.1). Holds only ids and scheduling metadata;
/// the job records themselves live in the repository.
pub struct PendingQueue {
    inner: RwLock<Inner>,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                heap: PriorityQueue::new(),
                entries: HashMap::new(),
                capacity,
            }),
        }
    }

    pub fn enqueue(&self, job_id: impl Into<String>, priority: i64) -> Result<()> {
        let job_id = job_id.into();
        let mut inner = self.inner.write();
        if inner.entries.contains_key(&job_id) {
            return Err(Error::DuplicateInQueue { job_id });
        }
        if inner.entries.len() >= inner.capacity {
            return Err(Error::QueueFull {
                capacity: inner.capacity,
            });
        }
        let entry = Entry {
            job_id: job_id.clone(),
            base_priority: priority,
            enqueued_at: Utc::now(),
            aging_boost: 0,
        };
        let key = entry.key();
        inner.heap.push(job_id.clone(), key);
        inner.entries.insert(job_id, entry);
        Ok(())
    }

    pub fn dequeue(&self) -> Option<String> {
        let mut inner = self.inner.write();
        let (job_id, _) = inner.heap.pop()?;
        inner.entries.remove(&job_id);
        Some(job_id)
    }

    pub fn peek(&self) -> Option<String> {
        let inner = self.inner.read();
        inner.heap.peek().map(|(job_id, _)| job_id.clone())
    }

    /// O(log n) removal by id, per spec §4.1.
    pub fn remove(&self, job_id: &str) -> bool {
        let mut inner = self.inner.write();
        inner.entries.remove(job_id);
        inner.heap.remove(job_id).is_some()
    }

    /// 1-indexed rank in descending-priority order, or -1 if absent.
    pub fn position(&self, job_id: &str) -> i64 {
        let inner = self.inner.read();
        if !inner.entries.contains_key(job_id) {
            return -1;
        }
        let mut keyed: Vec<(&String, JobKey)> = inner
            .entries
            .iter()
            .map(|(id, entry)| (id, entry.key()))
            .collect();
        keyed.sort_by(|a, b| b.1.cmp(&a.1));
        keyed
            .iter()
            .position(|(id, _)| id.as_str() == job_id)
            .map(|idx| idx as i64 + 1)
            .unwrap_or(-1)
    }

    /// Snapshot in heap order, not total-sorted (spec §4.1).
    pub fn list(&self) -> Vec<String> {
        self.inner
            .read()
            .heap
            .iter()
            .map(|(job_id, _)| job_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// For every queued entry whose wait exceeds `threshold`, add `boost` to
    /// its aging boost and re-heapify. Aging is monotonic: boost never
    /// decreases while a job remains queued (spec §4.1).
    pub fn apply_aging(&self, boost: i64, threshold: chrono::Duration) {
        self.apply_aging_capped(boost, threshold, i64::MAX);
    }

    /// As `apply_aging`, but the accumulated boost never exceeds `max_boost`
    /// (spec §9 Open Question 5: an unbounded aging boost could let a
    /// pathologically old job outrank any priority tier; this engine caps
    /// it instead).
    pub fn apply_aging_capped(&self, boost: i64, threshold: chrono::Duration, max_boost: i64) {
        let mut inner = self.inner.write();
        let now = Utc::now();
        let stale: Vec<String> = inner
            .entries
            .values()
            .filter(|e| now - e.enqueued_at > threshold)
            .map(|e| e.job_id.clone())
            .collect();
        for job_id in stale {
            if let Some(entry) = inner.entries.get_mut(&job_id) {
                entry.aging_boost = entry.aging_boost.saturating_add(boost).min(max_boost);
                let key = entry.key();
                inner.heap.change_priority(&job_id, key);
            }
        }
    }

    pub fn effective_priority(&self, job_id: &str) -> Option<i64> {
        self.inner
            .read()
            .entries
            .get(job_id)
            .map(|e| e.effective_priority())
    }
}
