//! Cache Node
//!
//! One cache node: the in-memory [`DataContainer`] on the fast path, the
//! persistence tier behind it, and the transactions open against both.
//!
//! Mutations hold the container lock while the tier is updated so memory and
//! store change in the same order. Reads release it before asking the tier but
//! keep the key's lock, so no put or remove of that key slips in between the
//! miss and the activation.

use std::io::{Read, Write};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheEntry, CacheStats, DataContainer, TransactionCoordinator, TxPhase, MAX_KEY_LENGTH,
    MAX_VALUE_SIZE,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::persistence::{
    ClusterPeer, LockContainer, Modification, PassivationCoordinator, PersistenceManager,
    PersistenceStats, RemoteValueSource, TxId, WriteContext,
};

/// Combined node statistics.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub cache: CacheStats,
    pub persistence: PersistenceStats,
}

// == Cache Node ==
pub struct Cache {
    name: String,
    container: Mutex<DataContainer>,
    /// Taken before `container` by every per-key mutation and activation
    key_locks: LockContainer,
    persistence: PersistenceManager,
    transactions: TransactionCoordinator,
    default_lifespan: Option<Duration>,
}

impl Cache {
    /// Builds a node and its store stack. The node is not started.
    pub fn new(config: &Config, remote: Option<Arc<dyn RemoteValueSource>>) -> Result<Arc<Self>> {
        let persistence = PersistenceManager::new(config.store.clone(), remote)?;
        Ok(Self::with_persistence(config, persistence))
    }

    /// Builds a node over an already assembled tier; `config.store` is not
    /// consulted.
    pub fn with_persistence(config: &Config, persistence: PersistenceManager) -> Arc<Self> {
        let cache = Arc::new(Self {
            name: config.node_name.clone(),
            container: Mutex::new(DataContainer::new(config.max_entries)),
            key_locks: LockContainer::new(),
            persistence,
            transactions: TransactionCoordinator::new(),
            default_lifespan: config.default_lifespan(),
        });

        // singleton stores pull in-memory state from the node on takeover
        let weak: Weak<Cache> = Arc::downgrade(&cache);
        cache.persistence.set_state_provider(Arc::new(move || {
            weak.upgrade().map(|cache| cache.entries()).unwrap_or_default()
        }));
        cache
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn persistence(&self) -> &PersistenceManager {
        &self.persistence
    }

    fn tier(&self) -> &PassivationCoordinator {
        self.persistence.passivation()
    }

    // == Lifecycle ==
    /// Starts the persistence tier and preloads the container if configured.
    /// With passivation on, preloaded entries leave the store.
    pub fn start(&self) -> Result<()> {
        self.persistence.start()?;

        let mut container = self.container.lock();
        let preloaded = self.persistence.preload(container.max_entries())?;
        let count = preloaded.len();
        for entry in preloaded {
            let key = entry.key.clone();
            self.put_in_memory(&mut container, entry, None)?;
            self.tier().on_preload(&key)?;
        }
        info!("Cache node '{}' started ({} entries preloaded)", self.name, count);
        Ok(())
    }

    /// Passivates everything in memory when passivation is on, then stops the
    /// tier, draining any write-behind queue.
    pub fn stop(&self) -> Result<()> {
        if self.tier().passivation_enabled() {
            let entries = self.container.lock().drain();
            let count = self.tier().passivate_all(entries)?;
            info!("Passivated {} entries on shutdown", count);
        }
        self.persistence.stop()?;
        info!("Cache node '{}' stopped", self.name);
        Ok(())
    }

    // == Writes ==
    /// Stores `value` under `key`. Without an explicit `ttl` the node's
    /// default lifespan applies.
    pub fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<CacheEntry> {
        let entry = self.new_entry(key, value, ttl)?;
        self.write(entry.clone(), WriteContext::local())?;
        Ok(entry)
    }

    /// Applies a put that was issued on another node.
    pub fn replicate_put(&self, entry: CacheEntry) -> Result<()> {
        self.write(entry, WriteContext::remote())
    }

    /// Removes `key` from memory and the tier.
    pub fn delete(&self, key: &str) -> Result<()> {
        if self.remove(key, WriteContext::local())? {
            Ok(())
        } else {
            Err(CacheError::NotFound(key.to_string()))
        }
    }

    /// Applies a removal that was issued on another node.
    pub fn replicate_remove(&self, key: &str) -> Result<bool> {
        self.remove(key, WriteContext::remote())
    }

    pub fn clear(&self) -> Result<usize> {
        let mut container = self.container.lock();
        let count = container.clear();
        self.tier().on_clear(WriteContext::local())?;
        Ok(count)
    }

    fn new_entry(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<CacheEntry> {
        if key.is_empty() {
            return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(CacheError::InvalidRequest(format!(
                "Key exceeds maximum length of {} characters",
                MAX_KEY_LENGTH
            )));
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(CacheError::InvalidRequest(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            )));
        }
        Ok(CacheEntry::new(key, value).with_lifespan(ttl.or(self.default_lifespan)))
    }

    fn write(&self, entry: CacheEntry, ctx: WriteContext) -> Result<()> {
        let _key = self.key_locks.acquire_key(&entry.key);
        let mut container = self.container.lock();
        self.put_in_memory(&mut container, entry, Some(ctx))
    }

    /// Puts `entry` in memory and passivates whatever it displaces. With
    /// `mirror` set the tier also sees the write. When the tier fails the
    /// container is put back as it was, and a victim that already reached the
    /// store stays there.
    fn put_in_memory(
        &self,
        container: &mut DataContainer,
        entry: CacheEntry,
        mirror: Option<WriteContext>,
    ) -> Result<()> {
        let key = entry.key.clone();
        let previous = container.peek(&key);
        let evicted = container.put(entry.clone())?;

        if let Some(victim) = evicted {
            debug!("Evicted '{}' from memory", victim.key);
            if let Err(e) = self.tier().on_evict(victim.clone()) {
                warn!("Passivation of '{}' failed, keeping it in memory: {}", victim.key, e);
                container.remove(&key);
                container.put(victim)?;
                return Err(e.into());
            }
        }

        if let Some(ctx) = mirror {
            if let Err(e) = self.tier().on_write(entry, ctx) {
                container.remove(&key);
                if let Some(previous) = previous {
                    container.put(previous)?;
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn remove(&self, key: &str, ctx: WriteContext) -> Result<bool> {
        let _key = self.key_locks.acquire_key(key);
        let mut container = self.container.lock();
        let in_memory = container
            .remove(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false);
        let in_store = self.tier().on_remove(key, ctx)?;
        Ok(in_memory || in_store)
    }

    // == Reads ==
    /// Returns the live entry for `key`, activating it from the tier on a
    /// memory miss.
    pub fn get(&self, key: &str) -> Result<CacheEntry> {
        let miss = match self.container.lock().get(key) {
            Ok(entry) => return Ok(entry),
            Err(e @ (CacheError::NotFound(_) | CacheError::Expired(_))) => e,
            Err(e) => return Err(e),
        };

        if !self.persistence.is_enabled() {
            return Err(miss);
        }

        let _key = self.key_locks.acquire_key(key);
        // filled by another reader while this one waited for the key
        if let Some(entry) = self.container.lock().peek(key) {
            return Ok(entry);
        }
        let Some(loaded) = self.tier().on_miss(key)? else {
            return Err(miss);
        };

        let mut container = self.container.lock();
        // a commit may have written the key while the tier was read
        if let Some(current) = container.peek(key) {
            return Ok(current);
        }
        if let Err(e) = self.put_in_memory(&mut container, loaded.clone(), None) {
            if self.tier().passivation_enabled() {
                // activation already took the stored copy
                if let Err(restore) = self.tier().on_evict(loaded) {
                    warn!("Could not return '{}' to the store: {}", key, restore);
                }
            }
            return Err(e);
        }
        debug!("Loaded '{}' from the persistence tier", key);
        Ok(loaded)
    }

    /// True if `key` is live in memory or in the tier.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        if self.container.lock().contains_key(key) {
            return Ok(true);
        }
        match self.persistence.stack().root() {
            Some(root) => Ok(root.contains_key(key)?),
            None => Ok(false),
        }
    }

    /// Snapshot of every live in-memory entry.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.container.lock().entries()
    }

    pub fn len(&self) -> usize {
        self.container.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.container.lock().is_empty()
    }

    // == Expiration ==
    /// Drops expired entries from memory.
    pub fn cleanup_expired(&self) -> usize {
        self.container.lock().cleanup_expired()
    }

    /// Drops expired entries from the tier.
    pub fn purge_store(&self) -> Result<usize> {
        Ok(self.persistence.purge_expired()?)
    }

    // == Cluster ==
    pub fn on_coordinator_change(&self, is_coordinator: bool) -> Result<()> {
        Ok(self.persistence.on_coordinator_change(is_coordinator)?)
    }

    /// Writes this node's persistent state for a joining node.
    pub fn generate_state(&self, out: &mut dyn Write) -> Result<usize> {
        Ok(self.persistence.generate_state(out)?)
    }

    /// Applies state received from another node.
    pub fn apply_state(&self, input: &mut dyn Read) -> Result<usize> {
        Ok(self.persistence.apply_state(input, WriteContext::forced())?)
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            cache: self.container.lock().stats(),
            persistence: self.persistence.stats(),
        }
    }

    // == Transactions ==
    pub fn begin_tx(&self) -> TxId {
        self.transactions.begin()
    }

    pub fn record_modification(&self, tx: TxId, modification: Modification) -> Result<()> {
        self.transactions.record(tx, modification)
    }

    /// Records a put in `tx`, validated as [`put`](Self::put) would.
    pub fn tx_put(&self, tx: TxId, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let entry = self.new_entry(key, value, ttl)?;
        self.record_modification(tx, Modification::Write(entry))
    }

    pub fn tx_remove(&self, tx: TxId, key: &str) -> Result<()> {
        self.record_modification(tx, Modification::Remove(key.to_string()))
    }

    /// Prepares `tx`. One-phase prepare applies and closes the transaction.
    pub fn prepare(&self, tx: TxId, one_phase: bool) -> Result<()> {
        if one_phase {
            let (_, modifications) = self.transactions.finish(tx)?;
            return self.apply_one_phase(tx, modifications);
        }
        let modifications = self.transactions.prepare(tx)?;
        if !self.tier().passivation_enabled() {
            if let Err(e) = self
                .persistence
                .prepare(modifications, tx, false, WriteContext::local())
            {
                warn!("Prepare of {} failed, rolling back: {}", tx, e);
                self.transactions.take(tx);
                self.persistence.rollback(tx)?;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Commits `tx`. A transaction that was never prepared commits in one phase.
    /// Unknown or already finished transactions are a no-op.
    pub fn commit(&self, tx: TxId) -> Result<()> {
        let Some((phase, modifications)) = self.transactions.take(tx) else {
            debug!("Commit of unknown transaction {}, nothing to do", tx);
            return Ok(());
        };
        match phase {
            TxPhase::Active => self.apply_one_phase(tx, modifications),
            TxPhase::Prepared => {
                let mut container = self.container.lock();
                if !self.tier().passivation_enabled() {
                    self.persistence.commit(tx, WriteContext::local())?;
                }
                self.apply_to_memory(&mut container, modifications)
            }
        }
    }

    /// Discards `tx`. Unknown or already finished transactions are a no-op.
    pub fn rollback(&self, tx: TxId) -> Result<()> {
        let Some((phase, _)) = self.transactions.take(tx) else {
            debug!("Rollback of unknown transaction {}, nothing to do", tx);
            return Ok(());
        };
        if phase == TxPhase::Prepared {
            self.persistence.rollback(tx)?;
        }
        Ok(())
    }

    fn apply_one_phase(&self, tx: TxId, modifications: Vec<Modification>) -> Result<()> {
        let mut container = self.container.lock();
        if !self.tier().passivation_enabled() {
            self.persistence
                .prepare(modifications.clone(), tx, true, WriteContext::local())?;
        }
        self.apply_to_memory(&mut container, modifications)
    }

    /// Replays committed modifications on the container. With passivation on
    /// the tier holds only evicted entries, so it is updated per key here
    /// rather than through its transaction log.
    fn apply_to_memory(
        &self,
        container: &mut DataContainer,
        modifications: Vec<Modification>,
    ) -> Result<()> {
        let passivating = self.tier().passivation_enabled();
        let ctx = WriteContext::local();
        for modification in modifications {
            match modification {
                Modification::Write(entry) => {
                    self.put_in_memory(container, entry, passivating.then_some(ctx))?;
                }
                Modification::Remove(key) => {
                    container.remove(&key);
                    if passivating {
                        self.tier().on_remove(&key, ctx)?;
                    }
                }
                Modification::ClearAll => {
                    container.clear();
                    if passivating {
                        self.tier().on_clear(ctx)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl ClusterPeer for Cache {
    fn peer_name(&self) -> String {
        self.name.clone()
    }

    fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.container.lock().peek(key)
    }
}
