//! Store Statistics
//!
//! Lock-free operation counters kept by the base stores.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operation counters for one base store.
#[derive(Debug, Default)]
pub struct StoreStats {
    loads: AtomicU64,
    load_hits: AtomicU64,
    writes: AtomicU64,
    removes: AtomicU64,
    clears: AtomicU64,
    purged: AtomicU64,
}

/// Point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatsSnapshot {
    pub loads: u64,
    pub load_hits: u64,
    pub writes: u64,
    pub removes: u64,
    pub clears: u64,
    pub purged: u64,
}

impl StoreStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_load(&self, hit: bool) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.load_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purged(&self, count: usize) {
        self.purged.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            loads: self.loads.load(Ordering::Relaxed),
            load_hits: self.load_hits.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.loads,
            &self.load_hits,
            &self.writes,
            &self.removes,
            &self.clears,
            &self.purged,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
