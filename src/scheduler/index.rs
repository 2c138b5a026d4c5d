//! The in-memory scheduler index: a flat array of 86,400 buckets (one per UTC second-of-day),
//! preferred over a nested hour->minute->second map for cache locality, per the codebase's
//! general preference for simple owned collections over hand-rolled concurrent trees.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

const SECONDS_PER_DAY: usize = 86_400;

#[derive(Default)]
struct IndexInner {
    buckets: Vec<HashSet<String>>,
    reverse: HashMap<String, u32>,
}

impl IndexInner {
    fn new() -> Self {
        Self {
            buckets: (0..SECONDS_PER_DAY).map(|_| HashSet::new()).collect(),
            reverse: HashMap::new(),
        }
    }
}

/// Second-of-day bucketed index of `scheduled` alarms. Guarded by a single read/write lock:
/// concurrent due-set lookups never block each other; add/remove take exclusive access.
pub struct SchedulerIndex {
    inner: RwLock<IndexInner>,
}

impl SchedulerIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner::new()),
        }
    }

    /// Inserts or relocates `code_id` to bucket `second_of_day`. Idempotent: re-adding at the
    /// same key is a no-op, a different key is equivalent to remove+add.
    pub async fn add(&self, code_id: &str, second_of_day: u32) {
        let mut guard = self.inner.write().await;
        if let Some(&existing) = guard.reverse.get(code_id) {
            if existing == second_of_day {
                return;
            }
            guard.buckets[existing as usize].remove(code_id);
        }
        guard.buckets[second_of_day as usize].insert(code_id.to_string());
        guard.reverse.insert(code_id.to_string(), second_of_day);
    }

    /// O(1) removal via the reverse map. No-op if `code_id` isn't indexed.
    pub async fn remove(&self, code_id: &str) {
        let mut guard = self.inner.write().await;
        if let Some(second_of_day) = guard.reverse.remove(code_id) {
            guard.buckets[second_of_day as usize].remove(code_id);
        }
    }

    /// O(1) snapshot of the due-set at `second_of_day`. Returns an owned copy so the caller can
    /// iterate without holding the guard across Controller dispatch.
    pub async fn due(&self, second_of_day: u32) -> Vec<String> {
        let guard = self.inner.read().await;
        guard.buckets[second_of_day as usize].iter().cloned().collect()
    }

    pub async fn contains(&self, code_id: &str) -> bool {
        self.inner.read().await.reverse.contains_key(code_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.reverse.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Counts + per-hour distribution, for observability.
    pub async fn snapshot_stats(&self) -> IndexStats {
        let guard = self.inner.read().await;
        let mut per_hour = [0usize; 24];
        for (idx, bucket) in guard.buckets.iter().enumerate() {
            if !bucket.is_empty() {
                per_hour[idx / 3600] += bucket.len();
            }
        }
        IndexStats {
            total: guard.reverse.len(),
            per_hour,
        }
    }
}

impl Default for SchedulerIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub total: usize,
    pub per_hour: [usize; 24],
}
