//! Transaction relay gate.

use crate::{Block, Hash256, Transaction};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Chain-side checks the relay gate consults.
pub trait RelaySink: Send + Sync {
    /// Whether the chain is initialized enough to judge transactions.
    fn is_ready(&self) -> bool;

    /// Whether the transaction is already persisted.
    fn contains(&self, hash: &Hash256) -> bool;

    /// Structural/signature verification against the current pool.
    fn verify(&self, tx: &Transaction, pool: &[Transaction]) -> bool;

    /// Height advertised to peers in `version`.
    fn start_height(&self) -> u32;
}

/// Outcome of submitting a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayResult {
    Accepted,
    AlreadyPooled,
    AlreadyPersisted,
    LedgerNotReady,
    Invalid,
}

/// Transactions accepted for relay and not yet persisted.
#[derive(Debug, Default)]
pub struct RelayPool {
    txs: RwLock<HashMap<Hash256, Transaction>>,
}

impl RelayPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the admission gate and pool the transaction if it passes.
    pub fn submit(&self, tx: Transaction, sink: &dyn RelaySink) -> RelayResult {
        if !sink.is_ready() {
            return RelayResult::LedgerNotReady;
        }
        let hash = tx.hash();
        if self.txs.read().contains_key(&hash) {
            return RelayResult::AlreadyPooled;
        }
        if sink.contains(&hash) {
            return RelayResult::AlreadyPersisted;
        }

        let snapshot = self.snapshot();
        if !sink.verify(&tx, &snapshot) {
            return RelayResult::Invalid;
        }

        // Re-check under the write lock; another submitter may have won.
        let mut txs = self.txs.write();
        if txs.contains_key(&hash) {
            return RelayResult::AlreadyPooled;
        }
        txs.insert(hash, tx);
        debug!(tx = %hash, pooled = txs.len(), "Transaction accepted for relay");
        RelayResult::Accepted
    }

    pub fn get(&self, hash: &Hash256) -> Option<Transaction> {
        self.txs.read().get(hash).cloned()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.txs.read().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.txs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Transaction> {
        self.txs.read().values().cloned().collect()
    }

    /// Drop every pooled transaction included in `block`.
    pub fn remove_block(&self, block: &Block) -> usize {
        let mut txs = self.txs.write();
        let before = txs.len();
        for tx in &block.transactions {
            txs.remove(&tx.hash());
        }
        before - txs.len()
    }
}
