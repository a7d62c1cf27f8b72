//! Bounded in-memory vector cache with least-recently-used eviction.
//!
//! The cache maps item identifiers (e.g. episode ids) to embedding vectors
//! and bounds memory by evicting the least-recently-touched entry whenever a
//! new key would exceed capacity. Both `get` and `put` count as a touch.
//!
//! Entries live in a slot arena threaded with an intrusive doubly-linked
//! recency list (slot indices, not pointers), plus a key-to-slot map and a
//! free list of vacated slots, so touch and eviction are O(1). All mutation
//! is serialized behind a single mutex; nothing under the lock performs I/O.
//! Flushing evicted vectors to a durable store is the caller's concern, not
//! the cache's.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;

/// Nil marker for recency-list links.
const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot {
    key: String,
    vector: Embedding,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
struct Inner {
    /// Key to slot index.
    map: HashMap<String, usize>,

    /// Slot arena; grows up to capacity and is then reused via `free`.
    slots: Vec<Slot>,

    /// Indices of vacated slots available for reuse.
    free: Vec<usize>,

    /// Least-recently-used slot.
    head: usize,

    /// Most-recently-used slot.
    tail: usize,
}

impl Inner {
    /// Unlink a slot from the recency list.
    fn detach(&mut self, idx: usize) {
        let prev = self.slots[idx].prev;
        let next = self.slots[idx].next;

        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }

        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    /// Link a slot at the most-recently-used end.
    fn attach_mru(&mut self, idx: usize) {
        self.slots[idx].prev = self.tail;
        self.slots[idx].next = NIL;
        if self.tail == NIL {
            self.head = idx;
        } else {
            self.slots[self.tail].next = idx;
        }
        self.tail = idx;
    }

    /// Count an access: move the slot to the most-recently-used position.
    fn touch(&mut self, idx: usize) {
        if self.tail == idx {
            return;
        }
        self.detach(idx);
        self.attach_mru(idx);
    }

    /// Remove the least-recently-used entry and recycle its slot.
    fn evict_lru(&mut self) {
        let idx = self.head;
        if idx == NIL {
            return;
        }
        self.detach(idx);
        let key = std::mem::take(&mut self.slots[idx].key);
        self.slots[idx].vector = Vec::new();
        self.map.remove(&key);
        self.free.push(idx);
        debug!(%key, "evicted least-recently-used cache entry");
    }

    /// Vacate a specific slot (explicit invalidation).
    fn vacate(&mut self, idx: usize) {
        self.detach(idx);
        self.slots[idx].key = String::new();
        self.slots[idx].vector = Vec::new();
        self.free.push(idx);
    }
}

/// Statistics about the vector cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries currently cached.
    pub current_size: usize,

    /// Maximum number of entries.
    pub max_size: usize,

    /// Fill ratio in [0, 1].
    pub utilization: f32,
}

/// A fixed-capacity LRU cache from item identifiers to embedding vectors.
pub struct BoundedVectorCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl BoundedVectorCache {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of zero is clamped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                slots: Vec::new(),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // A poisoned guard still holds a consistent structure.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert or overwrite an entry, marking it most-recently-used.
    ///
    /// When inserting a new key at capacity, the least-recently-touched
    /// entry is evicted first. Eviction is a pure in-memory side effect.
    pub fn put(&self, key: impl Into<String>, vector: Embedding) {
        let key = key.into();
        let mut inner = self.lock();

        if let Some(&idx) = inner.map.get(&key) {
            inner.slots[idx].vector = vector;
            inner.touch(idx);
            return;
        }

        if inner.map.len() >= self.capacity {
            inner.evict_lru();
        }

        let idx = match inner.free.pop() {
            Some(idx) => {
                inner.slots[idx].key = key.clone();
                inner.slots[idx].vector = vector;
                idx
            }
            None => {
                inner.slots.push(Slot {
                    key: key.clone(),
                    vector,
                    prev: NIL,
                    next: NIL,
                });
                inner.slots.len() - 1
            }
        };
        inner.attach_mru(idx);
        inner.map.insert(key, idx);
    }

    /// Look up an entry, marking it most-recently-used on a hit.
    ///
    /// A miss returns `None` and leaves the cache untouched.
    pub fn get(&self, key: &str) -> Option<Embedding> {
        let mut inner = self.lock();
        let idx = *inner.map.get(key)?;
        inner.touch(idx);
        Some(inner.slots[idx].vector.clone())
    }

    /// Check for a key without counting an access.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().map.contains_key(key)
    }

    /// Explicitly remove an entry. Returns whether the key was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.lock();
        match inner.map.remove(key) {
            Some(idx) => {
                inner.vacate(idx);
                true
            }
            None => false,
        }
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read-only cache statistics.
    pub fn stats(&self) -> CacheStats {
        let current_size = self.len();
        CacheStats {
            current_size,
            max_size: self.capacity,
            utilization: current_size as f32 / self.capacity as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Walk the recency list from LRU to MRU, returning keys in order.
    fn recency_order(cache: &BoundedVectorCache) -> Vec<String> {
        let inner = cache.lock();
        let mut keys = Vec::new();
        let mut idx = inner.head;
        while idx != NIL {
            keys.push(inner.slots[idx].key.clone());
            idx = inner.slots[idx].next;
        }
        keys
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = BoundedVectorCache::new(4);
        cache.put("a", vec![1.0, 2.0]);
        assert_eq!(cache.get("a"), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn miss_returns_none_without_size_change() {
        let cache = BoundedVectorCache::new(4);
        cache.put("a", vec![1.0]);
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let cache = BoundedVectorCache::new(3);
        for i in 0..20 {
            cache.put(format!("key-{i}"), vec![i as f32]);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn evicts_least_recently_touched_key() {
        let cache = BoundedVectorCache::new(2);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);

        // Touch A so B becomes the LRU entry.
        assert!(cache.get("a").is_some());
        cache.put("c", vec![3.0]);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(vec![1.0]));
        assert_eq!(cache.get("c"), Some(vec![3.0]));
    }

    #[test]
    fn put_counts_as_touch() {
        let cache = BoundedVectorCache::new(2);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);

        // Overwriting A moves it to MRU, so B is evicted next.
        cache.put("a", vec![9.0]);
        cache.put("c", vec![3.0]);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(vec![9.0]));
    }

    #[test]
    fn overwrite_does_not_duplicate() {
        let cache = BoundedVectorCache::new(3);
        cache.put("a", vec![1.0]);
        cache.put("a", vec![2.0]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), Some(vec![2.0]));
    }

    #[test]
    fn eviction_order_after_mixed_touches() {
        let cache = BoundedVectorCache::new(3);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        cache.put("c", vec![3.0]);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_some());
        assert_eq!(recency_order(&cache), vec!["c", "a", "b"]);

        cache.put("d", vec![4.0]);
        assert_eq!(cache.get("c"), None);
        assert_eq!(recency_order(&cache), vec!["a", "b", "d"]);
    }

    #[test]
    fn recency_list_length_matches_size() {
        let cache = BoundedVectorCache::new(4);
        for i in 0..10 {
            cache.put(format!("k{i}"), vec![i as f32]);
            assert_eq!(recency_order(&cache).len(), cache.len());
        }
        cache.invalidate("k9");
        assert_eq!(recency_order(&cache).len(), cache.len());
    }

    #[test]
    fn invalidate_removes_entry_and_frees_slot() {
        let cache = BoundedVectorCache::new(2);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.len(), 1);

        // The vacated slot is reusable without evicting B.
        cache.put("c", vec![3.0]);
        assert_eq!(cache.get("b"), Some(vec![2.0]));
        assert_eq!(cache.get("c"), Some(vec![3.0]));
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let cache = BoundedVectorCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(vec![2.0]));
    }

    #[test]
    fn capacity_one_always_keeps_latest() {
        let cache = BoundedVectorCache::new(1);
        for i in 0..5 {
            cache.put(format!("k{i}"), vec![i as f32]);
            assert_eq!(cache.len(), 1);
        }
        assert_eq!(cache.get("k4"), Some(vec![4.0]));
    }

    #[test]
    fn stats_report_size_capacity_utilization() {
        let cache = BoundedVectorCache::new(4);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);

        let stats = cache.stats();
        assert_eq!(stats.current_size, 2);
        assert_eq!(stats.max_size, 4);
        assert!((stats.utilization - 0.5).abs() < 1e-6);
    }

    #[test]
    fn end_to_end_capacity_two_scenario() {
        let cache = BoundedVectorCache::new(2);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        cache.put("c", vec![3.0]);

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(vec![2.0]));
        assert_eq!(cache.get("c"), Some(vec![3.0]));
    }

    #[test]
    fn concurrent_puts_respect_capacity() {
        use std::sync::Arc;

        let cache = Arc::new(BoundedVectorCache::new(8));
        let mut handles = Vec::new();
        for t in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    cache.put(format!("t{t}-{i}"), vec![i as f32]);
                    cache.get(&format!("t{t}-{}", i / 2));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
        assert_eq!(recency_order(&cache).len(), 8);
    }
}
