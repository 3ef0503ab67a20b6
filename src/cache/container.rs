//! Data Container Module
//!
//! The in-memory fast path of a cache node: a HashMap of entries with LRU
//! eviction and lazy expiration. The container never talks to the persistence
//! tier itself; it reports evicted entries to its caller, which hands them to
//! the passivation coordinator.

use std::collections::HashMap;

use crate::cache::{CacheEntry, CacheStats, LruTracker};
use crate::error::{CacheError, Result};

// == Data Container ==
/// In-memory entry storage with LRU eviction and expiration support.
#[derive(Debug)]
pub struct DataContainer {
    /// Key -> entry
    entries: HashMap<String, CacheEntry>,
    /// LRU access tracker
    lru: LruTracker,
    /// Performance statistics
    stats: CacheStats,
    /// Maximum number of entries held in memory
    max_entries: usize,
}

impl DataContainer {
    // == Constructor ==
    /// Creates a new container holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries,
        }
    }

    // == Put ==
    /// Stores an entry, replacing any previous entry under the same key.
    ///
    /// If the container is at capacity and the key is new, the least recently
    /// used entry is evicted and returned so the caller can passivate it.
    pub fn put(&mut self, entry: CacheEntry) -> Result<Option<CacheEntry>> {
        let is_overwrite = self.entries.contains_key(&entry.key);

        let mut evicted = None;
        if !is_overwrite && self.entries.len() >= self.max_entries {
            match self.lru.evict_oldest() {
                Some(evicted_key) => {
                    evicted = self.entries.remove(&evicted_key);
                    self.stats.record_eviction();
                }
                None => {
                    return Err(CacheError::CacheFull(
                        "Cache is full and eviction failed".to_string(),
                    ));
                }
            }
        }

        self.lru.touch(&entry.key);
        self.entries.insert(entry.key.clone(), entry);
        self.stats.set_total_entries(self.entries.len());

        Ok(evicted)
    }

    // == Get ==
    /// Retrieves an entry by key and records the access.
    ///
    /// Expired entries are removed and reported as `CacheError::Expired`.
    pub fn get(&mut self, key: &str) -> Result<CacheEntry> {
        let expired = match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.touch();
                let found = entry.clone();
                self.lru.touch(key);
                self.stats.record_hit();
                return Ok(found);
            }
            Some(_) => true,
            None => false,
        };

        self.stats.record_miss();
        if expired {
            self.entries.remove(key);
            self.lru.remove(key);
            self.stats.record_expirations(1);
            self.stats.set_total_entries(self.entries.len());
            Err(CacheError::Expired(key.to_string()))
        } else {
            Err(CacheError::NotFound(key.to_string()))
        }
    }

    // == Peek ==
    /// Returns a live entry without touching it or the statistics.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    /// Returns true if a live entry exists for the key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    // == Remove ==
    /// Removes an entry by key, returning it if it was present.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.lru.remove(key);
            self.stats.set_total_entries(self.entries.len());
        }
        removed
    }

    // == Clear ==
    /// Removes every entry, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.lru.clear();
        self.stats.set_total_entries(0);
        count
    }

    // == Drain ==
    /// Removes and returns every live entry; expired ones are discarded.
    pub fn drain(&mut self) -> Vec<CacheEntry> {
        self.lru.clear();
        self.stats.set_total_entries(0);
        self.entries
            .drain()
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired())
            .collect()
    }

    /// Returns a snapshot of every live entry.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries
            .values()
            .filter(|entry| !entry.is_expired())
            .cloned()
            .collect()
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, returning the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.entries.remove(key);
            self.lru.remove(key);
        }

        self.stats.record_expirations(expired_keys.len());
        self.stats.set_total_entries(self.entries.len());
        expired_keys.len()
    }

    // == Stats ==
    /// Returns current container statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn entry(key: &str, value: &str) -> CacheEntry {
        CacheEntry::new(key, value)
    }

    #[test]
    fn test_container_put_and_get() {
        let mut container = DataContainer::new(100);

        assert!(container.put(entry("key1", "value1")).unwrap().is_none());
        let found = container.get("key1").unwrap();

        assert_eq!(found.value, "value1");
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_container_get_nonexistent() {
        let mut container = DataContainer::new(100);

        let result = container.get("nonexistent");
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_container_overwrite_does_not_evict() {
        let mut container = DataContainer::new(1);

        container.put(entry("key1", "value1")).unwrap();
        let evicted = container.put(entry("key1", "value2")).unwrap();

        assert!(evicted.is_none());
        assert_eq!(container.get("key1").unwrap().value, "value2");
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_container_lru_eviction_returns_entry() {
        let mut container = DataContainer::new(3);

        container.put(entry("key1", "value1")).unwrap();
        container.put(entry("key2", "value2")).unwrap();
        container.put(entry("key3", "value3")).unwrap();

        // key1 is oldest and must come back to the caller
        let evicted = container.put(entry("key4", "value4")).unwrap().unwrap();
        assert_eq!(evicted.key, "key1");
        assert_eq!(evicted.value, "value1");

        assert_eq!(container.len(), 3);
        assert!(container.get("key1").is_err());
        assert_eq!(container.stats().evictions, 1);
    }

    #[test]
    fn test_container_lru_touch_on_get() {
        let mut container = DataContainer::new(3);

        container.put(entry("key1", "value1")).unwrap();
        container.put(entry("key2", "value2")).unwrap();
        container.put(entry("key3", "value3")).unwrap();
        container.get("key1").unwrap();

        let evicted = container.put(entry("key4", "value4")).unwrap().unwrap();
        assert_eq!(evicted.key, "key2");
    }

    #[test]
    fn test_container_zero_capacity_is_full() {
        let mut container = DataContainer::new(0);

        let result = container.put(entry("key1", "value1"));
        assert!(matches!(result, Err(CacheError::CacheFull(_))));
    }

    #[test]
    fn test_container_expired_entry() {
        let mut container = DataContainer::new(100);

        container
            .put(entry("key1", "value1").with_lifespan(Some(Duration::from_millis(50))))
            .unwrap();
        assert!(container.get("key1").is_ok());

        sleep(Duration::from_millis(80));

        assert!(!container.contains_key("key1"));
        assert!(container.peek("key1").is_none());
        assert!(matches!(container.get("key1"), Err(CacheError::Expired(_))));
        assert!(container.is_empty());
        assert_eq!(container.stats().expirations, 1);
    }

    #[test]
    fn test_container_stats() {
        let mut container = DataContainer::new(100);

        container.put(entry("key1", "value1")).unwrap();
        container.get("key1").unwrap();
        let _ = container.get("nonexistent");

        let stats = container.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_container_cleanup_expired() {
        let mut container = DataContainer::new(100);

        container
            .put(entry("key1", "value1").with_lifespan(Some(Duration::from_millis(50))))
            .unwrap();
        container
            .put(entry("key2", "value2").with_lifespan(Some(Duration::from_secs(10))))
            .unwrap();

        sleep(Duration::from_millis(80));

        assert_eq!(container.cleanup_expired(), 1);
        assert_eq!(container.len(), 1);
        assert!(container.get("key2").is_ok());
    }

    #[test]
    fn test_container_remove_clear_drain() {
        let mut container = DataContainer::new(100);

        container.put(entry("a", "1")).unwrap();
        container.put(entry("b", "2")).unwrap();
        container.put(entry("c", "3")).unwrap();

        assert_eq!(container.remove("a").unwrap().value, "1");
        assert!(container.remove("a").is_none());

        let mut drained: Vec<String> = container.drain().into_iter().map(|e| e.key).collect();
        drained.sort();
        assert_eq!(drained, vec!["b".to_string(), "c".to_string()]);
        assert!(container.is_empty());

        container.put(entry("d", "4")).unwrap();
        assert_eq!(container.clear(), 1);
        assert!(container.is_empty());
    }
}
