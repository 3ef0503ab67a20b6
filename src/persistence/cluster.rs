//! Cluster Fallback Loader
//!
//! A read-only store that answers misses by asking other nodes for their
//! in-memory copy. Writes are accepted and dropped: peers own their state.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{Modification, Store, TxId, WriteContext};
use crate::cache::CacheEntry;
use crate::error::StoreResult;

/// Anything that can fetch a value held by another node.
pub trait RemoteValueSource: Send + Sync {
    /// Returns the first value any peer holds for `key`, or `None` once
    /// `timeout` has passed without a positive answer.
    fn request_value(&self, key: &str, timeout: Duration) -> Option<CacheEntry>;
}

/// A node that can be asked for its copy of a key without side effects.
pub trait ClusterPeer: Send + Sync {
    fn peer_name(&self) -> String;

    fn peek(&self, key: &str) -> Option<CacheEntry>;
}

// == Peer Group ==
/// In-process group of peers. Holds them weakly so a stopped node drops out
/// without deregistering.
#[derive(Default)]
pub struct PeerGroup {
    peers: RwLock<Vec<Weak<dyn ClusterPeer>>>,
}

impl PeerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, peer: Weak<dyn ClusterPeer>) {
        self.peers.write().push(peer);
    }

    /// Number of peers still alive.
    pub fn len(&self) -> usize {
        self.live_peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_peers(&self) -> Vec<Arc<dyn ClusterPeer>> {
        let mut peers = self.peers.write();
        peers.retain(|p| p.strong_count() > 0);
        peers.iter().filter_map(Weak::upgrade).collect()
    }
}

impl RemoteValueSource for PeerGroup {
    fn request_value(&self, key: &str, timeout: Duration) -> Option<CacheEntry> {
        let peers = self.live_peers();
        if peers.is_empty() {
            return None;
        }
        let deadline = Instant::now() + timeout;
        let (tx, rx) = channel::unbounded();
        let mut asked = 0;
        for peer in peers {
            let tx = tx.clone();
            let key = key.to_string();
            let spawned = thread::Builder::new()
                .name(format!("cluster-peek-{}", peer.peer_name()))
                .spawn(move || {
                    let _ = tx.send(peer.peek(&key));
                });
            match spawned {
                Ok(_) => asked += 1,
                Err(e) => warn!("Cluster loader could not ask a peer: {}", e),
            }
        }
        drop(tx);

        for _ in 0..asked {
            match rx.recv_deadline(deadline) {
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => continue,
                Err(_) => break,
            }
        }
        None
    }
}

// == Cluster Loader ==
pub struct ClusterLoader {
    source: Arc<dyn RemoteValueSource>,
    timeout: Duration,
}

impl ClusterLoader {
    pub fn new(source: Arc<dyn RemoteValueSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }
}

impl Store for ClusterLoader {
    fn kind(&self) -> &'static str {
        "cluster"
    }

    fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let found = self
            .source
            .request_value(key, self.timeout)
            .filter(|entry| !entry.is_expired());
        debug!("Cluster loader lookup for '{}': hit={}", key, found.is_some());
        Ok(found)
    }

    /// Peers are never enumerated; bulk loads see nothing.
    fn load_all(&self) -> StoreResult<Vec<CacheEntry>> {
        Ok(Vec::new())
    }

    fn store(&self, _entry: CacheEntry, _ctx: WriteContext) -> StoreResult<()> {
        Ok(())
    }

    fn remove(&self, _key: &str, _ctx: WriteContext) -> StoreResult<bool> {
        Ok(false)
    }

    fn clear(&self, _ctx: WriteContext) -> StoreResult<()> {
        Ok(())
    }

    fn purge_expired(&self) -> StoreResult<usize> {
        Ok(0)
    }

    fn prepare(
        &self,
        _modifications: Vec<Modification>,
        _tx: TxId,
        _one_phase: bool,
        _ctx: WriteContext,
    ) -> StoreResult<()> {
        Ok(())
    }

    fn commit(&self, _tx: TxId, _ctx: WriteContext) -> StoreResult<()> {
        Ok(())
    }

    fn rollback(&self, _tx: TxId) -> StoreResult<()> {
        Ok(())
    }
}
