//! Passivation Coordinator
//!
//! Sits between the in-memory container and the store stack. With passivation
//! on, an entry lives in exactly one place: memory or the store. Eviction
//! writes it out (passivation) and a miss that finds it in the store pulls
//! it back in and deletes the stored copy (activation). With passivation off
//! the store is a write-through copy of memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::{Store, WriteContext};
use crate::cache::CacheEntry;
use crate::error::StoreResult;

/// Point-in-time passivation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassivationStats {
    pub passivations: u64,
    pub activations: u64,
    pub loads: u64,
    pub misses: u64,
}

// == Passivation Coordinator ==
pub struct PassivationCoordinator {
    store: Option<Arc<dyn Store>>,
    passivation: bool,
    passivations: AtomicU64,
    activations: AtomicU64,
    loads: AtomicU64,
    misses: AtomicU64,
}

impl PassivationCoordinator {
    pub fn new(store: Option<Arc<dyn Store>>, passivation: bool) -> Self {
        Self {
            store,
            passivation,
            passivations: AtomicU64::new(0),
            activations: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn passivation_enabled(&self) -> bool {
        self.passivation && self.store.is_some()
    }

    /// Called with every entry the container evicts.
    pub fn on_evict(&self, entry: CacheEntry) -> StoreResult<()> {
        let Some(store) = self.store.as_ref().filter(|_| self.passivation) else {
            return Ok(());
        };
        if entry.is_expired() {
            debug!("Dropping expired entry '{}' instead of passivating", entry.key);
            return Ok(());
        }
        store.store(entry, WriteContext::local())?;
        self.passivations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Called when the container misses `key`. Returns the stored entry if any;
    /// with passivation on the stored copy is removed.
    pub fn on_miss(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        self.loads.fetch_add(1, Ordering::Relaxed);
        let Some(entry) = store.load(key)? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        if self.passivation {
            store.remove(key, WriteContext::local())?;
            self.activations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Some(entry))
    }

    /// Called for each entry preloaded into memory at startup. With passivation
    /// on, the stored copy is removed as it would be on activation.
    pub fn on_preload(&self, key: &str) -> StoreResult<()> {
        let Some(store) = self.store.as_ref().filter(|_| self.passivation) else {
            return Ok(());
        };
        if store.remove(key, WriteContext::local())? {
            self.activations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Mirrors a put into the store.
    pub fn on_write(&self, entry: CacheEntry, ctx: WriteContext) -> StoreResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if self.passivation {
            // the in-memory copy is now authoritative
            if store.remove(&entry.key, ctx)? {
                self.activations.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        } else {
            store.store(entry, ctx)
        }
    }

    pub fn on_remove(&self, key: &str, ctx: WriteContext) -> StoreResult<bool> {
        match &self.store {
            Some(store) => store.remove(key, ctx),
            None => Ok(false),
        }
    }

    pub fn on_clear(&self, ctx: WriteContext) -> StoreResult<()> {
        match &self.store {
            Some(store) => store.clear(ctx),
            None => Ok(()),
        }
    }

    /// Writes out every entry still in memory; used when a passivating node
    /// stops so nothing is lost.
    pub fn passivate_all(&self, entries: Vec<CacheEntry>) -> StoreResult<usize> {
        let mut count = 0;
        for entry in entries {
            self.on_evict(entry)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn stats(&self) -> PassivationStats {
        PassivationStats {
            passivations: self.passivations.load(Ordering::Relaxed),
            activations: self.activations.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
