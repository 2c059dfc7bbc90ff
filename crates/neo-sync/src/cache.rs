//! Bounded cache of downloaded blocks awaiting persistence.

use bytes::Bytes;
use neo_network::{Block, PeerId};
use std::collections::BTreeMap;

/// A downloaded block with the bytes it arrived as.
#[derive(Debug, Clone)]
pub struct CachedBlock {
    pub block: Block,
    pub raw: Bytes,
    /// Peer that delivered it, blamed if the ledger rejects it.
    pub peer: PeerId,
}

/// Height-ordered block cache with a hard capacity.
#[derive(Debug)]
pub struct BlockCache {
    capacity: usize,
    entries: BTreeMap<u32, CachedBlock>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
        }
    }

    /// Insert a block. Rejected when full or when the height is taken.
    pub fn insert(&mut self, entry: CachedBlock) -> bool {
        let height = entry.block.index();
        if self.is_full() || self.entries.contains_key(&height) {
            return false;
        }
        self.entries.insert(height, entry);
        true
    }

    pub fn contains(&self, height: u32) -> bool {
        self.entries.contains_key(&height)
    }

    /// Remove the block at exactly `height`.
    pub fn take(&mut self, height: u32) -> Option<CachedBlock> {
        self.entries.remove(&height)
    }

    /// Drop every entry at or below `height`; returns how many went.
    pub fn prune_through(&mut self, height: u32) -> usize {
        let keep = self.entries.split_off(&height.saturating_add(1));
        let dropped = self.entries.len();
        self.entries = keep;
        dropped
    }

    pub fn first_height(&self) -> Option<u32> {
        self.entries.keys().next().copied()
    }

    pub fn last_height(&self) -> Option<u32> {
        self.entries.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.entries.len())
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo_network::{Hash256, Header, Witness};

    fn entry(index: u32) -> CachedBlock {
        CachedBlock {
            block: Block {
                header: Header {
                    version: 0,
                    prev_hash: Hash256::ZERO,
                    merkle_root: Hash256::ZERO,
                    timestamp: 0,
                    index,
                    consensus_data: 0,
                    next_consensus: [0u8; 20],
                    witness: Witness::default(),
                },
                transactions: Vec::new(),
            },
            raw: Bytes::new(),
            peer: PeerId(1),
        }
    }

    #[test]
    fn test_capacity_is_hard() {
        let mut cache = BlockCache::new(2);
        assert!(cache.insert(entry(3)));
        assert!(!cache.insert(entry(3)));
        assert!(cache.insert(entry(1)));
        assert!(cache.is_full());
        assert!(!cache.insert(entry(2)));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.remaining(), 0);
    }

    #[test]
    fn test_ordered_by_height() {
        let mut cache = BlockCache::new(10);
        for index in [7, 5, 6] {
            cache.insert(entry(index));
        }
        assert_eq!(cache.first_height(), Some(5));
        assert_eq!(cache.last_height(), Some(7));
        assert!(cache.take(4).is_none());
        assert_eq!(cache.take(5).map(|e| e.block.index()), Some(5));
    }

    #[test]
    fn test_prune_through() {
        let mut cache = BlockCache::new(10);
        for index in 1..=5 {
            cache.insert(entry(index));
        }
        assert_eq!(cache.prune_through(3), 3);
        assert_eq!(cache.first_height(), Some(4));
        assert_eq!(cache.prune_through(u32::MAX), 2);
        assert!(cache.is_empty());
    }
}
