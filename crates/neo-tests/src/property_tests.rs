//! Property-based tests using proptest.
//!
//! These tests verify peer selection and request bookkeeping invariants
//! using randomly generated pools and delivery orders.

use crate::generators::{test_addr, test_chain};
use crate::harness::SyncHarness;
use neo_network::serialize::Serializable;
use neo_network::{NodeManagerConfig, PeerId};
use neo_sync::{BlockCache, CachedBlock, FlightInfo, Ledger, RequestInfo, SyncConfig};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

// ============================================================================
// Strategies
// ============================================================================

/// Best heights of a small pool.
fn arb_pool_heights() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..200, 1..8)
}

/// Address book operations: (kind, address index).
fn arb_book_ops() -> impl Strategy<Value = Vec<(u8, u16)>> {
    prop::collection::vec((0u8..5, 100u16..120), 1..60)
}

fn big_pool() -> NodeManagerConfig {
    NodeManagerConfig {
        max_clients: 64,
        ..Default::default()
    }
}

// ============================================================================
// Peer selection
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The chosen peer reaches the wanted height, and nothing is chosen
    /// only when no peer does.
    #[test]
    fn next_node_reaches_height(heights in arb_pool_heights(), wanted in 0u32..220) {
        let mut h = SyncHarness::with_pool(SyncConfig::default(), big_pool(), 1);
        let peers: Vec<_> = heights.iter().map(|height| h.connect(*height)).collect();

        match h.nodes.get_next_node(wanted) {
            Some(peer) => {
                prop_assert!(peer.best_height() >= wanted);
                prop_assert!(peers.iter().any(|p| p.id() == peer.id()));
            }
            None => prop_assert!(heights.iter().all(|height| *height < wanted)),
        }
    }

    /// A retry never goes to a peer with more failures than some other
    /// qualifying peer.
    #[test]
    fn retry_picks_least_failed(
        failures in prop::collection::vec(0u32..4, 1..8),
        wanted in 0u32..10,
    ) {
        let mut h = SyncHarness::with_pool(SyncConfig::default(), big_pool(), 1);
        let mut history: HashMap<PeerId, u32> = HashMap::new();
        for count in &failures {
            let peer = h.connect(10);
            if *count > 0 {
                history.insert(peer.id(), *count);
            }
        }

        let chosen = h.nodes.get_node_with_min_failed_time(&history, wanted);
        let chosen = chosen.map(|peer| history.get(&peer.id()).copied().unwrap_or(0));
        let least = failures.iter().copied().min();
        prop_assert_eq!(chosen, least);
    }

    /// Queued, known, bad and connected stay pairwise disjoint under any
    /// sequence of admissions, replacements and disconnects.
    #[test]
    fn address_sets_stay_disjoint(ops in arb_book_ops()) {
        let config = NodeManagerConfig {
            max_clients: 6,
            min_clients: 2,
            ..Default::default()
        };
        let mut h = SyncHarness::with_pool(SyncConfig::default(), config, 1);
        let mut connected = Vec::new();

        for (kind, n) in ops {
            match kind {
                0 => {
                    h.nodes.add_addresses([test_addr(n)]);
                }
                1 => {
                    h.nodes.connect_to(test_addr(n));
                }
                2 if h.nodes.node_count() < 6 => connected.push(h.connect(10)),
                3 if !connected.is_empty() => {
                    let peer = connected.remove(n as usize % connected.len());
                    h.nodes.replace_node(peer.id());
                }
                4 => h.nodes.check_pool(),
                _ => {}
            }

            let sets: [Vec<SocketAddr>; 4] = [
                h.nodes.queued_addresses(),
                h.nodes.known_addresses(),
                h.nodes.bad_addresses(),
                h.nodes.connected_addresses(),
            ];
            let total: usize = sets.iter().map(Vec::len).sum();
            let union: HashSet<SocketAddr> = sets.iter().flatten().copied().collect();
            prop_assert_eq!(union.len(), total);
        }
    }
}

// ============================================================================
// Request bookkeeping
// ============================================================================

proptest! {
    /// Re-adding a flight for the same peer replaces it; a request never
    /// holds two flights for one peer.
    #[test]
    fn one_flight_per_peer(peers in prop::collection::vec(1u64..6, 1..40)) {
        let mut request = RequestInfo::new(7);
        for id in &peers {
            request.add_new_flight(FlightInfo::new(PeerId(*id), 7));
        }
        let distinct: HashSet<u64> = peers.iter().copied().collect();
        prop_assert_eq!(request.flight_count(), distinct.len());
        prop_assert_eq!(
            request.most_recent_flight().map(|f| f.peer),
            peers.last().map(|id| PeerId(*id))
        );
    }

    /// Failure totals match the per-peer counts.
    #[test]
    fn failure_counts_add_up(peers in prop::collection::vec(1u64..6, 0..40)) {
        let mut request = RequestInfo::new(1);
        for id in &peers {
            request.mark_failed_node(PeerId(*id));
        }
        let sum: u32 = request.failed_nodes().values().sum();
        prop_assert_eq!(sum, peers.len() as u32);
        prop_assert_eq!(request.failed_total(), peers.len() as u32);
    }
}

// ============================================================================
// Block cache and persistence
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The cache never exceeds its capacity.
    #[test]
    fn cache_is_bounded(
        capacity in 1usize..20,
        heights in prop::collection::vec(1u32..40, 0..80),
    ) {
        let chain = test_chain(40);
        let mut cache = BlockCache::new(capacity);
        for height in heights {
            let block = chain[height as usize].clone();
            let raw = block.to_bytes();
            cache.insert(CachedBlock { block, raw, peer: PeerId(1) });
            prop_assert!(cache.len() <= capacity);
        }
    }

    /// Whatever order blocks arrive in, the ledger ends up with every
    /// delivered prefix stored in height order.
    #[test]
    fn persistence_follows_height_order(
        order in Just((1u32..=12).collect::<Vec<_>>()).prop_shuffle(),
        delivered in 0usize..=12,
    ) {
        let mut h = SyncHarness::new(SyncConfig::default(), 12);
        h.store_headers(12);
        let peer = h.connect(12);
        h.sync.sync_block();

        let delivered: Vec<u32> = order[..delivered].to_vec();
        for height in &delivered {
            h.deliver_block(peer.id(), *height);
            h.sync.persist_ready_blocks();
        }

        let got: HashSet<u32> = delivered.iter().copied().collect();
        let prefix = (1..=12).take_while(|height| got.contains(height)).count() as u32;
        prop_assert_eq!(h.ledger.cur_block_height(), prefix);
        for height in 1..=prefix {
            let block = h.ledger.block(height);
            prop_assert_eq!(block.as_ref(), Some(&h.chain[height as usize]));
        }
        prop_assert_eq!(h.sync.cache_len(), delivered.len() - prefix as usize);
    }
}
