//! Persistence Module
//!
//! The pluggable tier behind the in-memory container. Everything here speaks
//! the [`Store`] contract: base stores hold entries on some medium, decorators
//! (chaining, shared/singleton, async) wrap one or more stores, and the
//! [`PersistenceManager`] exposes the assembled stack to the cache node.

mod async_store;
mod builder;
mod chaining;
mod cluster;
mod config;
mod file;
mod locks;
mod manager;
mod memory;
mod modification;
mod passivation;
mod shared;
mod stats;
mod stream;

use std::io::{Read, Write};

use crate::cache::CacheEntry;
use crate::error::StoreResult;

pub use async_store::{AsyncStats, AsyncStore};
pub use builder::{StoreStack, StoreStackBuilder};
pub use chaining::ChainingStore;
pub use cluster::{ClusterLoader, ClusterPeer, PeerGroup, RemoteValueSource};
pub use config::{AsyncConfig, ReaperConfig, SingletonConfig, StoreConfig, StoreKind};
pub use file::FileStore;
pub use locks::{lock_id, LockContainer, LockGuard};
pub use manager::{PersistenceManager, PersistenceStats};
pub use memory::InMemoryStore;
pub use modification::{apply_modification, Modification, ModificationLog, TxId};
pub use passivation::{PassivationCoordinator, PassivationStats};
pub use shared::{SharedPolicy, SharedStore, StateProvider};
pub use stats::{StoreStats, StoreStatsSnapshot};
pub use stream::{read_entries, write_entries};

// == Write Context ==
/// Per-operation context carried by every mutating store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteContext {
    /// The cache operation was invoked on this node (not replicated to it)
    pub origin_local: bool,
    /// Bypass shared-store write deduplication
    pub force_write: bool,
}

impl WriteContext {
    /// A write issued by a caller on this node.
    pub fn local() -> Self {
        Self {
            origin_local: true,
            force_write: false,
        }
    }

    /// A write replicated to this node from another one.
    pub fn remote() -> Self {
        Self {
            origin_local: false,
            force_write: false,
        }
    }

    /// A write that must reach the backing store whatever its origin.
    pub fn forced() -> Self {
        Self {
            origin_local: true,
            force_write: true,
        }
    }
}

impl Default for WriteContext {
    fn default() -> Self {
        Self::local()
    }
}

// == Store Trait ==
/// Synchronous key/value persistence.
///
/// Implementations must hide entries whose expiry has passed from `load`,
/// `contains_key` and `load_all`, even while they are still physically
/// present. Missing keys are not errors: `load` returns `Ok(None)` and
/// `remove` returns `Ok(false)`.
pub trait Store: Send + Sync {
    /// Short label used in log lines.
    fn kind(&self) -> &'static str;

    fn start(&self) -> StoreResult<()> {
        Ok(())
    }

    fn stop(&self) -> StoreResult<()> {
        Ok(())
    }

    fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

    fn load_all(&self) -> StoreResult<Vec<CacheEntry>>;

    /// Loads an arbitrary subset of at most `max_entries` live entries.
    fn load_some(&self, max_entries: usize) -> StoreResult<Vec<CacheEntry>> {
        let mut entries = self.load_all()?;
        entries.truncate(max_entries);
        Ok(entries)
    }

    fn contains_key(&self, key: &str) -> StoreResult<bool> {
        Ok(self.load(key)?.is_some())
    }

    fn store(&self, entry: CacheEntry, ctx: WriteContext) -> StoreResult<()>;

    /// Returns true iff something was removed.
    fn remove(&self, key: &str, ctx: WriteContext) -> StoreResult<bool>;

    fn clear(&self, ctx: WriteContext) -> StoreResult<()>;

    /// Physically removes expired entries, returning how many went.
    fn purge_expired(&self) -> StoreResult<usize>;

    /// Writes every live entry to `out` in the bulk-transfer layout.
    fn to_stream(&self, out: &mut dyn Write) -> StoreResult<usize> {
        let entries = self.load_all()?;
        write_entries(out, &entries)
    }

    /// Stores every entry read from `input`.
    fn from_stream(&self, input: &mut dyn Read, ctx: WriteContext) -> StoreResult<usize> {
        let entries = read_entries(input)?;
        let count = entries.len();
        for entry in entries {
            self.store(entry, ctx)?;
        }
        Ok(count)
    }

    /// Applies `modifications` now (`one_phase`) or stages them under `tx`.
    fn prepare(
        &self,
        modifications: Vec<Modification>,
        tx: TxId,
        one_phase: bool,
        ctx: WriteContext,
    ) -> StoreResult<()>;

    /// Replays staged modifications; unknown transactions are a no-op.
    fn commit(&self, tx: TxId, ctx: WriteContext) -> StoreResult<()>;

    /// Discards staged modifications; unknown transactions are a no-op.
    fn rollback(&self, tx: TxId) -> StoreResult<()>;
}
