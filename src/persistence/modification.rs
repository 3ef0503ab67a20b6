//! Modification Log
//!
//! Tagged modifications and the per-store log that stages them between a
//! two-phase `prepare` and the matching `commit` or `rollback`.

use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Store, WriteContext};
use crate::cache::CacheEntry;
use crate::error::StoreResult;

// == Transaction Id ==
/// Opaque transaction token. Carries no thread affinity, so a transaction
/// prepared on one thread may be committed or rolled back from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(Uuid);

impl TxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TxId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// == Modification ==
/// A single change destined for a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modification {
    Write(CacheEntry),
    Remove(String),
    ClearAll,
}

impl Modification {
    /// The key this modification targets, None for `ClearAll`.
    pub fn key(&self) -> Option<&str> {
        match self {
            Modification::Write(entry) => Some(&entry.key),
            Modification::Remove(key) => Some(key),
            Modification::ClearAll => None,
        }
    }
}

/// Applies one modification to a store.
pub fn apply_modification<S: Store + ?Sized>(
    store: &S,
    modification: Modification,
    ctx: WriteContext,
) -> StoreResult<()> {
    match modification {
        Modification::Write(entry) => store.store(entry, ctx),
        Modification::Remove(key) => store.remove(&key, ctx).map(|_| ()),
        Modification::ClearAll => store.clear(ctx),
    }
}

// == Modification Log ==
/// Staged transactions keyed by [`TxId`].
///
/// Modifications are kept exactly as issued: no per-key coalescing, so a
/// `Remove` after a `Write` still removes and a `ClearAll` followed by writes
/// leaves only those writes.
#[derive(Debug, Default)]
pub struct ModificationLog {
    records: DashMap<TxId, Vec<Modification>>,
}

impl ModificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-phase: runs `apply` over `modifications` in order and records
    /// nothing. Two-phase: stages the list under `tx`.
    pub fn prepare<F>(
        &self,
        tx: TxId,
        modifications: Vec<Modification>,
        one_phase: bool,
        apply: F,
    ) -> StoreResult<()>
    where
        F: FnMut(Modification) -> StoreResult<()>,
    {
        if one_phase {
            modifications.into_iter().try_for_each(apply)
        } else {
            self.records.insert(tx, modifications);
            Ok(())
        }
    }

    /// Replays the staged list for `tx` in issue order and forgets it.
    ///
    /// Returns false when nothing was staged (one-phase, already finished or
    /// never prepared); that is not an error.
    pub fn commit<F>(&self, tx: TxId, apply: F) -> StoreResult<bool>
    where
        F: FnMut(Modification) -> StoreResult<()>,
    {
        match self.records.remove(&tx) {
            Some((_, modifications)) => {
                modifications.into_iter().try_for_each(apply)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops the staged list for `tx`, returning whether there was one.
    pub fn rollback(&self, tx: TxId) -> bool {
        self.records.remove(&tx).is_some()
    }

    pub fn is_prepared(&self, tx: TxId) -> bool {
        self.records.contains_key(&tx)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
