//! Chain storage seen by the synchronizer.
//!
//! [`Ledger`] is the only contract the sync core has with durable storage:
//! heights, header hashes, header append and block append. [`MemoryLedger`]
//! is the in-process implementation used by the node and the tests.

use crate::error::{LedgerError, LedgerResult};
use neo_network::serialize::Serializable;
use neo_network::{Block, Hash256, Header, RelaySink, Transaction, Witness};
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::debug;

/// Timestamp of the mainnet genesis block.
const GENESIS_TIMESTAMP: u32 = 1_468_595_301;

/// Consensus nonce of the mainnet genesis block.
const GENESIS_CONSENSUS_DATA: u64 = 2_083_236_893;

/// Sequential store of accepted headers and blocks.
pub trait Ledger: Send + Sync {
    /// Height of the header tip.
    fn cur_header_height(&self) -> u32;

    /// Height of the last stored block.
    fn cur_block_height(&self) -> u32;

    /// Header hash at `height`, or [`Hash256::ZERO`] when unknown.
    fn header_hash_by_height(&self, height: u32) -> Hash256;

    /// Append headers; returns how many were accepted.
    fn add_headers(&self, headers: &[Header]) -> usize;

    /// Decode and append a block at `cur_block_height() + 1`.
    fn add_block(&self, raw: &[u8]) -> LedgerResult<Block>;
}

/// Genesis block both ends of the network agree on.
pub fn genesis_block() -> Block {
    Block {
        header: Header {
            version: 0,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            timestamp: GENESIS_TIMESTAMP,
            index: 0,
            consensus_data: GENESIS_CONSENSUS_DATA,
            next_consensus: [0u8; 20],
            witness: Witness::default(),
        },
        transactions: Vec::new(),
    }
}

#[derive(Debug)]
struct Chain {
    headers: Vec<Header>,
    header_hashes: Vec<Hash256>,
    blocks: Vec<Block>,
    persisted_txs: HashSet<Hash256>,
}

/// In-memory ledger rooted at a genesis block.
#[derive(Debug)]
pub struct MemoryLedger {
    chain: RwLock<Chain>,
}

impl MemoryLedger {
    pub fn new(genesis: Block) -> Self {
        let hash = genesis.hash();
        let persisted_txs = genesis.transactions.iter().map(Transaction::hash).collect();
        Self {
            chain: RwLock::new(Chain {
                headers: vec![genesis.header.clone()],
                header_hashes: vec![hash],
                blocks: vec![genesis],
                persisted_txs,
            }),
        }
    }

    /// Stored block at `height`.
    pub fn block(&self, height: u32) -> Option<Block> {
        self.chain.read().blocks.get(height as usize).cloned()
    }

    /// Stored header at `height`.
    pub fn header(&self, height: u32) -> Option<Header> {
        self.chain.read().headers.get(height as usize).cloned()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(genesis_block())
    }
}

impl Ledger for MemoryLedger {
    fn cur_header_height(&self) -> u32 {
        (self.chain.read().headers.len() - 1) as u32
    }

    fn cur_block_height(&self) -> u32 {
        (self.chain.read().blocks.len() - 1) as u32
    }

    fn header_hash_by_height(&self, height: u32) -> Hash256 {
        self.chain
            .read()
            .header_hashes
            .get(height as usize)
            .copied()
            .unwrap_or(Hash256::ZERO)
    }

    /// Accepts the longest prefix of `headers` linking onto the tip.
    fn add_headers(&self, headers: &[Header]) -> usize {
        let mut chain = self.chain.write();
        let mut accepted = 0;
        for header in headers {
            let tip_height = (chain.headers.len() - 1) as u32;
            let tip_hash = chain.header_hashes[tip_height as usize];
            if header.index != tip_height + 1 || header.prev_hash != tip_hash {
                break;
            }
            chain.header_hashes.push(header.hash());
            chain.headers.push(header.clone());
            accepted += 1;
        }
        if accepted > 0 {
            debug!(accepted, tip = chain.headers.len() - 1, "Headers stored");
        }
        accepted
    }

    fn add_block(&self, raw: &[u8]) -> LedgerResult<Block> {
        let block = Block::from_bytes(raw)?;
        let mut chain = self.chain.write();

        let current = (chain.blocks.len() - 1) as u32;
        let height = block.index();
        if height != current + 1 {
            return Err(LedgerError::OutOfOrder {
                current,
                got: height,
            });
        }
        let expected = *chain
            .header_hashes
            .get(height as usize)
            .ok_or(LedgerError::UnknownHeader(height))?;
        let got = block.hash();
        if got != expected {
            return Err(LedgerError::HashMismatch {
                height,
                expected,
                got,
            });
        }
        if Block::compute_merkle_root(&block.transactions) != block.header.merkle_root {
            return Err(LedgerError::MerkleMismatch(height));
        }

        for tx in &block.transactions {
            chain.persisted_txs.insert(tx.hash());
        }
        chain.blocks.push(block.clone());
        Ok(block)
    }
}

impl RelaySink for MemoryLedger {
    fn is_ready(&self) -> bool {
        !self.chain.read().blocks.is_empty()
    }

    fn contains(&self, hash: &Hash256) -> bool {
        self.chain.read().persisted_txs.contains(hash)
    }

    fn verify(&self, tx: &Transaction, pool: &[Transaction]) -> bool {
        !tx.data.is_empty() && !pool.iter().any(|pooled| pooled.data == tx.data)
    }

    fn start_height(&self) -> u32 {
        self.cur_block_height()
    }
}
