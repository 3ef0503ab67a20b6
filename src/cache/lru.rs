//! LRU Tracker Module
//!
//! Tracks access order for the in-memory container so it knows which entry
//! to evict (and hand to the passivation coordinator) when it is full.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Every touch stamps the key with a monotonically increasing sequence
/// number; the smallest live stamp is the least recently used key.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Key -> last access stamp
    stamps: HashMap<String, u64>,
    /// Access stamp -> key, ascending = oldest first
    order: BTreeMap<u64, String>,
    /// Next stamp to hand out
    next: u64,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used.
    pub fn touch(&mut self, key: &str) {
        let stamp = self.next;
        self.next += 1;
        if let Some(old) = self.stamps.insert(key.to_string(), stamp) {
            self.order.remove(&old);
        }
        self.order.insert(stamp, key.to_string());
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.stamps.remove(&key);
        Some(key)
    }

    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<&String> {
        self.order.values().next()
    }

    /// Forgets every key.
    pub fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.stamps.contains_key(key)
    }
}
