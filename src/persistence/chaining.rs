//! Chaining Store
//!
//! Composite over an ordered list of stores. Writes fan out to every child in
//! configured order on a best-effort basis; reads probe children in order and
//! the first hit wins. The chain holds no state of its own.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use super::{Modification, Store, TxId, WriteContext};
use crate::cache::CacheEntry;
use crate::error::{StoreError, StoreResult};

pub struct ChainingStore {
    stores: Vec<Arc<dyn Store>>,
}

impl ChainingStore {
    pub fn new(stores: Vec<Arc<dyn Store>>) -> Self {
        Self { stores }
    }

    pub fn stores(&self) -> &[Arc<dyn Store>] {
        &self.stores
    }

    /// Runs `op` on every child. Fails only if every child failed; partial
    /// failures are logged and the successful results returned.
    fn fan_out<R, F>(&self, op: &str, f: F) -> StoreResult<Vec<R>>
    where
        F: Fn(&dyn Store) -> StoreResult<R>,
    {
        let mut results = Vec::with_capacity(self.stores.len());
        let mut errors = Vec::new();
        for (index, store) in self.stores.iter().enumerate() {
            match f(store.as_ref()) {
                Ok(r) => results.push(r),
                Err(e) => {
                    warn!("Chained {} on store #{} ({}) failed: {}", op, index, store.kind(), e);
                    errors.push(e);
                }
            }
        }
        if !errors.is_empty() && results.is_empty() {
            return Err(StoreError::Aggregate(errors));
        }
        Ok(results)
    }

    /// Probes children in order and returns the first `Some`. A read error on
    /// one child does not stop the probe; it is returned only if no child
    /// answered and every child failed.
    fn probe<R, F>(&self, op: &str, f: F) -> StoreResult<Option<R>>
    where
        F: Fn(&dyn Store) -> StoreResult<Option<R>>,
    {
        let mut errors = Vec::new();
        for (index, store) in self.stores.iter().enumerate() {
            match f(store.as_ref()) {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => {}
                Err(e) => {
                    warn!("Chained {} on store #{} ({}) failed: {}", op, index, store.kind(), e);
                    errors.push(e);
                }
            }
        }
        if !errors.is_empty() && errors.len() == self.stores.len() {
            return Err(StoreError::Aggregate(errors));
        }
        Ok(None)
    }
}

impl Store for ChainingStore {
    fn kind(&self) -> &'static str {
        "chaining"
    }

    fn start(&self) -> StoreResult<()> {
        self.stores.iter().try_for_each(|s| s.start())
    }

    fn stop(&self) -> StoreResult<()> {
        self.fan_out("stop", |s| s.stop()).map(|_| ())
    }

    fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        self.probe("load", |s| s.load(key))
    }

    fn contains_key(&self, key: &str) -> StoreResult<bool> {
        self.probe("contains_key", |s| Ok(s.contains_key(key)?.then_some(())))
            .map(|found| found.is_some())
    }

    /// Union of every child; for keys held by several children the earliest
    /// child's copy wins.
    fn load_all(&self) -> StoreResult<Vec<CacheEntry>> {
        let per_store = self.fan_out("load_all", |s| s.load_all())?;
        let mut seen = HashSet::new();
        Ok(per_store
            .into_iter()
            .flatten()
            .filter(|entry| seen.insert(entry.key.clone()))
            .collect())
    }

    /// Fills from children in order; fails only if every child failed.
    fn load_some(&self, max_entries: usize) -> StoreResult<Vec<CacheEntry>> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut errors = Vec::new();
        for store in &self.stores {
            if entries.len() >= max_entries {
                break;
            }
            match store.load_some(max_entries) {
                Ok(batch) => entries.extend(
                    batch
                        .into_iter()
                        .filter(|entry| seen.insert(entry.key.clone()))
                        .take(max_entries - entries.len()),
                ),
                Err(e) => {
                    warn!("Chained load_some on {} failed: {}", store.kind(), e);
                    errors.push(e);
                }
            }
        }
        if !errors.is_empty() && errors.len() == self.stores.len() {
            return Err(StoreError::Aggregate(errors));
        }
        Ok(entries)
    }

    fn store(&self, entry: CacheEntry, ctx: WriteContext) -> StoreResult<()> {
        self.fan_out("store", |s| s.store(entry.clone(), ctx))
            .map(|_| ())
    }

    fn remove(&self, key: &str, ctx: WriteContext) -> StoreResult<bool> {
        self.fan_out("remove", |s| s.remove(key, ctx))
            .map(|removed| removed.into_iter().any(|r| r))
    }

    fn clear(&self, ctx: WriteContext) -> StoreResult<()> {
        self.fan_out("clear", |s| s.clear(ctx)).map(|_| ())
    }

    fn purge_expired(&self) -> StoreResult<usize> {
        self.fan_out("purge_expired", |s| s.purge_expired())
            .map(|counts| counts.into_iter().sum())
    }

    fn prepare(
        &self,
        modifications: Vec<Modification>,
        tx: TxId,
        one_phase: bool,
        ctx: WriteContext,
    ) -> StoreResult<()> {
        self.fan_out("prepare", |s| {
            s.prepare(modifications.clone(), tx, one_phase, ctx)
        })
        .map(|_| ())
    }

    fn commit(&self, tx: TxId, ctx: WriteContext) -> StoreResult<()> {
        self.fan_out("commit", |s| s.commit(tx, ctx)).map(|_| ())
    }

    fn rollback(&self, tx: TxId) -> StoreResult<()> {
        self.fan_out("rollback", |s| s.rollback(tx)).map(|_| ())
    }
}
