//! In-Memory Store
//!
//! A store backed by a HashMap. Named instances are registered process-wide,
//! so several cache nodes configured with the same name share one physical
//! store (the shared-store topology), and a node restarted in the same process
//! finds its entries again.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{
    apply_modification, Modification, ModificationLog, Store, StoreStats, TxId, WriteContext,
};
use crate::cache::{current_timestamp_ms, CacheEntry};
use crate::error::StoreResult;

static NAMED_STORES: Lazy<Mutex<HashMap<String, Arc<InMemoryStore>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

// == In-Memory Store ==
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    log: ModificationLog,
    stats: StoreStats,
}

impl InMemoryStore {
    /// Creates an unregistered store private to its owner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide store registered under `name`, creating it
    /// on first use.
    pub fn named(name: &str) -> Arc<Self> {
        NAMED_STORES
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Registering in-memory store '{}'", name);
                Arc::new(Self::new())
            })
            .clone()
    }

    /// Drops the registration for `name`; live handles keep working.
    pub fn unregister(name: &str) -> bool {
        NAMED_STORES.lock().remove(name).is_some()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Number of physically present entries, expired ones included.
    pub fn physical_len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the key is physically present, expired or not.
    pub fn physically_contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }
}

impl Store for InMemoryStore {
    fn kind(&self) -> &'static str {
        "in-memory"
    }

    fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let found = self
            .entries
            .read()
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned();
        self.stats.record_load(found.is_some());
        Ok(found)
    }

    fn load_all(&self) -> StoreResult<Vec<CacheEntry>> {
        let now = current_timestamp_ms();
        Ok(self
            .entries
            .read()
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
            .collect())
    }

    fn load_some(&self, max_entries: usize) -> StoreResult<Vec<CacheEntry>> {
        let now = current_timestamp_ms();
        Ok(self
            .entries
            .read()
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .take(max_entries)
            .cloned()
            .collect())
    }

    fn store(&self, entry: CacheEntry, _ctx: WriteContext) -> StoreResult<()> {
        self.entries.write().insert(entry.key.clone(), entry);
        self.stats.record_write();
        Ok(())
    }

    fn remove(&self, key: &str, _ctx: WriteContext) -> StoreResult<bool> {
        let removed = self.entries.write().remove(key).is_some();
        self.stats.record_remove();
        Ok(removed)
    }

    fn clear(&self, _ctx: WriteContext) -> StoreResult<()> {
        self.entries.write().clear();
        self.stats.record_clear();
        Ok(())
    }

    fn purge_expired(&self) -> StoreResult<usize> {
        let now = current_timestamp_ms();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        let purged = before - entries.len();
        self.stats.record_purged(purged);
        Ok(purged)
    }

    fn prepare(
        &self,
        modifications: Vec<Modification>,
        tx: TxId,
        one_phase: bool,
        ctx: WriteContext,
    ) -> StoreResult<()> {
        self.log.prepare(tx, modifications, one_phase, |m| {
            apply_modification(self, m, ctx)
        })
    }

    fn commit(&self, tx: TxId, ctx: WriteContext) -> StoreResult<()> {
        self.log
            .commit(tx, |m| apply_modification(self, m, ctx))
            .map(|_| ())
    }

    fn rollback(&self, tx: TxId) -> StoreResult<()> {
        self.log.rollback(tx);
        Ok(())
    }
}
