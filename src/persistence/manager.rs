//! Persistence Manager
//!
//! The cache node's single handle on the persistence tier. Owns the validated
//! configuration and the assembled store stack, and runs the lifecycle work
//! around it: startup purge, preload, expiry purges, state transfer and the
//! transaction pass-through.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{
    read_entries, write_entries, AsyncStats, Modification, PassivationCoordinator,
    PassivationStats, RemoteValueSource, StateProvider, Store, StoreConfig, StoreStack,
    StoreStackBuilder, TxId, WriteContext,
};
use crate::cache::CacheEntry;
use crate::error::StoreResult;

/// Consecutive purge failures before they are logged as errors.
const PURGE_FAILURE_ESCALATION: u64 = 3;

/// Snapshot of persistence-tier counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistenceStats {
    pub stack: String,
    pub passivation: PassivationStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_store: Option<AsyncStats>,
    pub skipped_shared_writes: u64,
    pub purge_runs: u64,
    pub purged: u64,
    pub purge_failures: u64,
    pub consecutive_purge_failures: u64,
}

// == Persistence Manager ==
pub struct PersistenceManager {
    config: StoreConfig,
    stack: StoreStack,
    passivation: PassivationCoordinator,
    purge_runs: AtomicU64,
    purged: AtomicU64,
    purge_failures: AtomicU64,
    consecutive_purge_failures: AtomicU64,
}

impl PersistenceManager {
    /// Validates `config` and builds its store stack.
    pub fn new(
        config: StoreConfig,
        remote: Option<Arc<dyn RemoteValueSource>>,
    ) -> StoreResult<Self> {
        let mut builder = StoreStackBuilder::new(config.clone());
        if let Some(remote) = remote {
            builder = builder.with_remote(remote);
        }
        let stack = builder.build()?;
        Ok(Self::with_stack(config, stack))
    }

    /// Uses an already assembled stack.
    pub fn with_stack(config: StoreConfig, stack: StoreStack) -> Self {
        let passivation = PassivationCoordinator::new(stack.root().cloned(), config.passivation);
        Self {
            config,
            stack,
            passivation,
            purge_runs: AtomicU64::new(0),
            purged: AtomicU64::new(0),
            purge_failures: AtomicU64::new(0),
            consecutive_purge_failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn stack(&self) -> &StoreStack {
        &self.stack
    }

    pub fn passivation(&self) -> &PassivationCoordinator {
        &self.passivation
    }

    pub fn is_enabled(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn start(&self) -> StoreResult<()> {
        let Some(root) = self.stack.root() else {
            return Ok(());
        };
        root.start()?;

        if self.config.purge_on_startup {
            if self.config.shared {
                warn!("purge_on_startup ignored: other nodes rely on the shared store");
            } else {
                root.clear(WriteContext::forced())?;
                info!("Purged store contents on startup");
            }
        }
        info!("Persistence started: {}", self.stack.describe());
        Ok(())
    }

    pub fn stop(&self) -> StoreResult<()> {
        match self.stack.root() {
            Some(root) => {
                root.stop()?;
                info!("Persistence stopped");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Entries to warm the container with, at most `max_entries`.
    pub fn preload(&self, max_entries: usize) -> StoreResult<Vec<CacheEntry>> {
        match self.stack.root() {
            Some(root) if self.config.preload => {
                let entries = root.load_some(max_entries)?;
                info!("Preloading {} entries from store", entries.len());
                Ok(entries)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Physically removes expired entries from the stack.
    ///
    /// Failures are counted; after three in a row they are reported as errors.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let Some(root) = self.stack.root() else {
            return Ok(0);
        };
        self.purge_runs.fetch_add(1, Ordering::Relaxed);
        match root.purge_expired() {
            Ok(count) => {
                self.consecutive_purge_failures.store(0, Ordering::Relaxed);
                self.purged.fetch_add(count as u64, Ordering::Relaxed);
                if count > 0 {
                    debug!("Purged {} expired entries from store", count);
                }
                Ok(count)
            }
            Err(e) => {
                self.purge_failures.fetch_add(1, Ordering::Relaxed);
                let streak = self
                    .consecutive_purge_failures
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if streak >= PURGE_FAILURE_ESCALATION {
                    error!("Store purge failed {} times in a row: {}", streak, e);
                } else {
                    warn!("Store purge failed: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Writes the store's contents for a joining node. Writes an empty stream
    /// when persistent state is not part of state transfer.
    pub fn generate_state(&self, out: &mut dyn Write) -> StoreResult<usize> {
        match self.stack.root() {
            Some(root) if self.config.fetch_persistent_state => root.to_stream(out),
            _ => write_entries(out, &[]),
        }
    }

    /// Applies a stream produced by [`generate_state`](Self::generate_state).
    pub fn apply_state(&self, input: &mut dyn Read, ctx: WriteContext) -> StoreResult<usize> {
        match self.stack.root() {
            Some(root) if self.config.fetch_persistent_state => root.from_stream(input, ctx),
            _ => read_entries(input).map(|_| 0),
        }
    }

    pub fn prepare(
        &self,
        modifications: Vec<Modification>,
        tx: TxId,
        one_phase: bool,
        ctx: WriteContext,
    ) -> StoreResult<()> {
        match self.stack.root() {
            Some(root) => root.prepare(modifications, tx, one_phase, ctx),
            None => Ok(()),
        }
    }

    pub fn commit(&self, tx: TxId, ctx: WriteContext) -> StoreResult<()> {
        match self.stack.root() {
            Some(root) => root.commit(tx, ctx),
            None => Ok(()),
        }
    }

    pub fn rollback(&self, tx: TxId) -> StoreResult<()> {
        match self.stack.root() {
            Some(root) => root.rollback(tx),
            None => Ok(()),
        }
    }

    /// Forwards a coordinator change to the singleton decorator, if any.
    pub fn on_coordinator_change(&self, is_coordinator: bool) -> StoreResult<()> {
        match self.stack.shared() {
            Some(shared) => shared.on_coordinator_change(is_coordinator),
            None => Ok(()),
        }
    }

    pub fn set_state_provider(&self, provider: StateProvider) {
        if let Some(shared) = self.stack.shared() {
            shared.set_state_provider(provider);
        }
    }

    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            stack: self.stack.describe(),
            passivation: self.passivation.stats(),
            async_store: self.stack.async_store().map(|a| a.stats()),
            skipped_shared_writes: self
                .stack
                .shared()
                .map(|s| s.skipped_writes())
                .unwrap_or(0),
            purge_runs: self.purge_runs.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            purge_failures: self.purge_failures.load(Ordering::Relaxed),
            consecutive_purge_failures: self.consecutive_purge_failures.load(Ordering::Relaxed),
        }
    }
}
