//! Test data generators for integration tests.
//!
//! Chains are deterministic: block `i` carries one transaction `tx-i`, so
//! the same length always yields the same hashes.

use neo_network::{Block, Header, Transaction, VersionPayload, NODE_NETWORK};
use neo_sync::genesis_block;
use std::net::SocketAddr;

/// Block interval used for generated timestamps.
const BLOCK_INTERVAL_SECS: u32 = 15;

/// Genesis followed by `len` linked blocks; index `i` is height `i`.
pub fn test_chain(len: u32) -> Vec<Block> {
    let mut blocks = vec![genesis_block()];
    for height in 1..=len {
        let prev = &blocks[(height - 1) as usize].header;
        let transactions = vec![test_tx(height)];
        let header = prev.child(
            Block::compute_merkle_root(&transactions),
            prev.timestamp + BLOCK_INTERVAL_SECS,
            u64::from(height),
        );
        blocks.push(Block {
            header,
            transactions,
        });
    }
    blocks
}

/// Deterministic transaction for `seed`.
pub fn test_tx(seed: u32) -> Transaction {
    Transaction::new(format!("tx-{seed}").into_bytes())
}

/// Headers of `blocks`, in order.
pub fn headers_of(blocks: &[Block]) -> Vec<Header> {
    blocks.iter().map(|b| b.header.clone()).collect()
}

/// Distinct routable-looking address for `n`.
pub fn test_addr(n: u16) -> SocketAddr {
    SocketAddr::from(([10, 0, (n >> 8) as u8, n as u8], 10333))
}

/// Version payload of a remote at `height`.
pub fn version_payload(nonce: u32, port: u16, height: u32) -> VersionPayload {
    VersionPayload {
        version: 0,
        services: NODE_NETWORK,
        timestamp: 0,
        port,
        nonce,
        user_agent: "/neo-tests/".to_string(),
        start_height: height,
        relay: true,
    }
}
