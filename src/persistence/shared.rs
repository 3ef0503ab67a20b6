//! Shared / Singleton Store Decorator
//!
//! Several nodes may front one physical store. Under [`SharedPolicy::Shared`]
//! every node writes, but only for operations that originated locally, so a
//! replicated write reaches the store once. Under [`SharedPolicy::Singleton`]
//! only the cluster coordinator writes at all.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{Modification, SingletonConfig, Store, TxId, WriteContext};
use crate::cache::CacheEntry;
use crate::error::{StoreError, StoreResult};

/// Supplies the node's in-memory entries when state must be pushed.
pub type StateProvider = Arc<dyn Fn() -> Vec<CacheEntry> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedPolicy {
    Shared,
    Singleton(SingletonConfig),
}

// == Shared Store ==
pub struct SharedStore {
    inner: Arc<dyn Store>,
    policy: SharedPolicy,
    coordinator: AtomicBool,
    skipped: AtomicU64,
    state_provider: RwLock<Option<StateProvider>>,
}

impl SharedStore {
    pub fn new(inner: Arc<dyn Store>, policy: SharedPolicy) -> Self {
        Self {
            inner,
            policy,
            // a lone node is its own coordinator until told otherwise
            coordinator: AtomicBool::new(true),
            skipped: AtomicU64::new(0),
            state_provider: RwLock::new(None),
        }
    }

    pub fn policy(&self) -> SharedPolicy {
        self.policy
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator.load(Ordering::SeqCst)
    }

    /// Writes suppressed because another node is responsible for them.
    pub fn skipped_writes(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn set_state_provider(&self, provider: StateProvider) {
        *self.state_provider.write() = Some(provider);
    }

    fn should_write(&self, ctx: WriteContext) -> bool {
        if ctx.force_write {
            return true;
        }
        let allowed = match self.policy {
            SharedPolicy::Shared => ctx.origin_local,
            SharedPolicy::Singleton(_) => self.is_coordinator(),
        };
        if !allowed {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    /// Reacts to a cluster view change.
    ///
    /// A singleton that becomes coordinator pushes the provider's entries into
    /// the store on a helper thread and waits at most `push_state_timeout`.
    pub fn on_coordinator_change(&self, is_coordinator: bool) -> StoreResult<()> {
        let SharedPolicy::Singleton(config) = self.policy else {
            return Ok(());
        };
        let was_coordinator = self.coordinator.swap(is_coordinator, Ordering::SeqCst);
        if !is_coordinator || was_coordinator {
            if was_coordinator && !is_coordinator {
                info!("Singleton store: no longer coordinator, writes suspended");
            }
            return Ok(());
        }

        info!("Singleton store: became coordinator");
        if !config.push_state_on_coordinator_change {
            return Ok(());
        }
        let Some(provider) = self.state_provider.read().clone() else {
            debug!("Singleton store: no state provider registered, nothing to push");
            return Ok(());
        };
        self.push_state(provider, config)
    }

    fn push_state(&self, provider: StateProvider, config: SingletonConfig) -> StoreResult<()> {
        let (done_tx, done_rx) = channel::bounded(1);
        let inner = self.inner.clone();
        thread::Builder::new()
            .name("singleton-push-state".to_string())
            .spawn(move || {
                let entries = provider();
                let count = entries.len();
                let result = entries
                    .into_iter()
                    .try_for_each(|entry| inner.store(entry, WriteContext::forced()))
                    .map(|_| count);
                let _ = done_tx.send(result);
            })?;

        match done_rx.recv_timeout(config.push_state_timeout) {
            Ok(Ok(count)) => {
                info!("Singleton store: pushed {} entries", count);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    "Singleton store: pushing state did not finish within {:?}",
                    config.push_state_timeout
                );
                Err(StoreError::PushStateTimeout(config.push_state_timeout))
            }
        }
    }
}

impl Store for SharedStore {
    fn kind(&self) -> &'static str {
        match self.policy {
            SharedPolicy::Shared => "shared",
            SharedPolicy::Singleton(_) => "singleton",
        }
    }

    fn start(&self) -> StoreResult<()> {
        self.inner.start()
    }

    fn stop(&self) -> StoreResult<()> {
        self.inner.stop()
    }

    fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        self.inner.load(key)
    }

    fn load_all(&self) -> StoreResult<Vec<CacheEntry>> {
        self.inner.load_all()
    }

    fn load_some(&self, max_entries: usize) -> StoreResult<Vec<CacheEntry>> {
        self.inner.load_some(max_entries)
    }

    fn contains_key(&self, key: &str) -> StoreResult<bool> {
        self.inner.contains_key(key)
    }

    fn store(&self, entry: CacheEntry, ctx: WriteContext) -> StoreResult<()> {
        if self.should_write(ctx) {
            self.inner.store(entry, ctx)?;
        }
        Ok(())
    }

    fn remove(&self, key: &str, ctx: WriteContext) -> StoreResult<bool> {
        if self.should_write(ctx) {
            self.inner.remove(key, ctx)
        } else {
            Ok(false)
        }
    }

    fn clear(&self, ctx: WriteContext) -> StoreResult<()> {
        if self.should_write(ctx) {
            self.inner.clear(ctx)?;
        }
        Ok(())
    }

    fn purge_expired(&self) -> StoreResult<usize> {
        match self.policy {
            SharedPolicy::Singleton(_) if !self.is_coordinator() => Ok(0),
            _ => self.inner.purge_expired(),
        }
    }

    fn prepare(
        &self,
        modifications: Vec<Modification>,
        tx: TxId,
        one_phase: bool,
        ctx: WriteContext,
    ) -> StoreResult<()> {
        if self.should_write(ctx) {
            self.inner.prepare(modifications, tx, one_phase, ctx)?;
        }
        Ok(())
    }

    fn commit(&self, tx: TxId, ctx: WriteContext) -> StoreResult<()> {
        if self.should_write(ctx) {
            self.inner.commit(tx, ctx)?;
        }
        Ok(())
    }

    fn rollback(&self, tx: TxId) -> StoreResult<()> {
        self.inner.rollback(tx)
    }
}
