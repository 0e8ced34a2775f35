use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// Bounded in-memory LRU tier.
///
/// All operations take a short synchronous lock so the per-frame
/// `contains` check never has to await. Inserts are first-writer-wins:
/// check and insert happen under the same lock, so two racing fetch paths
/// cannot both store a value for the same key.
pub struct MemoryTier<V> {
    entries: Mutex<LruCache<String, V>>,
}

impl<V: Clone> MemoryTier<V> {
    /// Create a tier holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(non_zero(capacity))),
        }
    }

    /// Get a value, marking it as recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Check presence without touching the LRU order.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }

    /// Insert `value` unless `key` is already present.
    ///
    /// Returns the value resident after the call: `value` itself, or the one
    /// stored by an earlier writer.
    pub fn insert_if_absent(&self, key: &str, value: V) -> V {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key) {
            return existing.clone();
        }
        entries.put(key.to_string(), value.clone());
        value
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.lock().pop(key)
    }

    /// Grow the capacity to at least `min_items`.
    ///
    /// Never shrinks. Returns whether the capacity changed. The resize is done
    /// in place and keeps every resident entry.
    pub fn raise_capacity(&self, min_items: usize) -> bool {
        let mut entries = self.entries.lock();
        if min_items <= entries.cap().get() {
            return false;
        }
        entries.resize(non_zero(min_items));
        true
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}
