//! Cache Statistics Module
//!
//! Tracks in-memory container metrics: hits, misses, evictions and expirations.

use serde::Serialize;

// == Cache Stats ==
/// Tracks in-memory container performance metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of lookups answered from memory
    pub hits: u64,
    /// Number of lookups memory could not answer (absent or expired)
    pub misses: u64,
    /// Number of entries pushed out by the LRU policy
    pub evictions: u64,
    /// Number of entries dropped because they expired
    pub expirations: u64,
    /// Current number of entries in memory
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
