//! Transaction Coordinator
//!
//! Tracks open cache transactions: the modifications recorded so far and
//! whether the transaction has been prepared.

use dashmap::DashMap;

use crate::error::{CacheError, Result};
use crate::persistence::{Modification, TxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    /// Accepting modifications
    Active,
    /// Prepared on the persistence tier; awaiting commit or rollback
    Prepared,
}

#[derive(Debug)]
struct TxState {
    phase: TxPhase,
    modifications: Vec<Modification>,
}

// == Transaction Coordinator ==
#[derive(Debug, Default)]
pub struct TransactionCoordinator {
    open: DashMap<TxId, TxState>,
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> TxId {
        let tx = TxId::new();
        self.open.insert(
            tx,
            TxState {
                phase: TxPhase::Active,
                modifications: Vec::new(),
            },
        );
        tx
    }

    /// Appends a modification to an active transaction.
    pub fn record(&self, tx: TxId, modification: Modification) -> Result<()> {
        let mut state = self
            .open
            .get_mut(&tx)
            .ok_or_else(|| CacheError::UnknownTransaction(tx.to_string()))?;
        if state.phase != TxPhase::Active {
            return Err(CacheError::InvalidRequest(format!(
                "transaction {} is already prepared",
                tx
            )));
        }
        state.modifications.push(modification);
        Ok(())
    }

    /// Marks `tx` prepared and returns its modifications in issue order.
    pub fn prepare(&self, tx: TxId) -> Result<Vec<Modification>> {
        let mut state = self
            .open
            .get_mut(&tx)
            .ok_or_else(|| CacheError::UnknownTransaction(tx.to_string()))?;
        state.phase = TxPhase::Prepared;
        Ok(state.modifications.clone())
    }

    /// Closes `tx`, returning the phase it reached and its modifications.
    pub fn finish(&self, tx: TxId) -> Result<(TxPhase, Vec<Modification>)> {
        self.take(tx)
            .ok_or_else(|| CacheError::UnknownTransaction(tx.to_string()))
    }

    /// Closes `tx` if it is open. `None` for unknown or already closed ids.
    pub fn take(&self, tx: TxId) -> Option<(TxPhase, Vec<Modification>)> {
        self.open
            .remove(&tx)
            .map(|(_, state)| (state.phase, state.modifications))
    }

    pub fn phase(&self, tx: TxId) -> Option<TxPhase> {
        self.open.get(&tx).map(|state| state.phase)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
