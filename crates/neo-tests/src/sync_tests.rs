//! Sync manager scenarios against scripted peers.

use crate::generators::headers_of;
use crate::harness::SyncHarness;
use neo_network::{Block, Hash256, RelayResult};
use neo_sync::{Ledger, SyncConfig};
use std::time::Duration;

fn hashes(blocks: &[Block]) -> Vec<Hash256> {
    blocks.iter().map(Block::hash).collect()
}

// ============================================================================
// Header sync
// ============================================================================

#[test]
fn test_late_answer_from_original_peer_is_ignored() {
    let mut h = SyncHarness::new(SyncConfig::default(), 120);
    h.store_headers(99);
    let mut x = h.connect(120);

    h.sync.sync_header();
    assert_eq!(h.sync.header_request().map(|r| r.height), Some(100));
    assert_eq!(x.header_requests(), vec![h.chain[99].hash()]);

    let y = h.connect(120);
    let batch = headers_of(&h.chain[100..]);
    h.sync.on_headers_received(y.id(), &batch);
    assert_eq!(h.ledger.cur_header_height(), 120);
    assert!(h.sync.header_request().is_none());

    h.sync.on_headers_received(x.id(), &batch);
    assert_eq!(h.ledger.cur_header_height(), 120);
    assert_eq!(x.peer.error_count(), 0);
    assert_eq!(y.peer.error_count(), 0);
}

#[test]
fn test_racing_duplicate_headers_apply_once() {
    let mut h = SyncHarness::new(SyncConfig::default(), 50);
    let peers: Vec<_> = (0..4).map(|_| h.connect(50)).collect();
    h.sync.sync_header();
    let batch = headers_of(&h.chain[1..]);

    std::thread::scope(|scope| {
        for peer in &peers {
            let sync = &h.sync;
            let batch = &batch;
            let id = peer.id();
            scope.spawn(move || {
                for _ in 0..5 {
                    sync.on_headers_received(id, batch);
                }
            });
        }
    });

    assert_eq!(h.ledger.cur_header_height(), 50);
    assert!(h.sync.header_request().is_none());
    for peer in &peers {
        assert_eq!(peer.peer.error_count(), 0);
    }
}

#[test]
fn test_look_ahead_resumes_after_blocks_catch_up() {
    let config = SyncConfig {
        header_look_ahead: 10,
        ..Default::default()
    };
    let mut h = SyncHarness::new(config, 40);
    let mut x = h.connect(40);
    h.store_headers(10);

    h.sync.sync_header();
    assert!(x.header_requests().is_empty());

    h.store_blocks(1);
    h.sync.sync_header();
    assert_eq!(x.header_requests(), vec![h.chain[10].hash()]);
}

#[tokio::test(start_paused = true)]
async fn test_header_retries_rotate_without_double_flight() {
    let mut h = SyncHarness::new(SyncConfig::default(), 10);
    let mut x = h.connect(10);
    let mut y = h.connect(10);

    h.sync.sync_header();
    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(6)).await;
        h.sync.check_header_timeout();
    }

    let request = h.sync.header_request().unwrap();
    assert!(request.flight_count() <= 2);
    assert_eq!(request.failed_total(), 4);
    assert!(request.has_failed(x.id()));
    assert!(request.has_failed(y.id()));
    assert_eq!(x.peer.timeout_count() + y.peer.timeout_count(), 4);

    // Every attempt restarts from the predecessor of the wanted height.
    let genesis = h.chain[0].hash();
    let mut starts = x.header_requests();
    starts.extend(y.header_requests());
    assert_eq!(starts.len(), 5);
    assert!(starts.iter().all(|hash| *hash == genesis));
}

#[tokio::test(start_paused = true)]
async fn test_header_retry_prefers_untried_peer() {
    let mut h = SyncHarness::new(SyncConfig::default(), 10);
    let x = h.connect(10);
    h.sync.sync_header();
    let y = h.connect(10);
    let z = h.connect(10);

    tokio::time::advance(Duration::from_secs(6)).await;
    h.sync.check_header_timeout();
    let second = h.sync.header_request().unwrap().last_used_node().unwrap();
    assert_ne!(second, x.id());

    tokio::time::advance(Duration::from_secs(6)).await;
    h.sync.check_header_timeout();
    let third = h.sync.header_request().unwrap().last_used_node().unwrap();
    assert_ne!(third, x.id());
    assert_ne!(third, second);
    assert!(third == y.id() || third == z.id());
}

#[tokio::test(start_paused = true)]
async fn test_header_timeout_without_alternative_drops_request() {
    let mut h = SyncHarness::new(SyncConfig::default(), 10);
    let x = h.connect(10);
    h.sync.sync_header();
    h.nodes.replace_node(x.id());

    tokio::time::advance(Duration::from_secs(6)).await;
    h.sync.check_header_timeout();
    assert!(h.sync.header_request().is_none());
}

// ============================================================================
// Block sync
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timed_out_batch_tags_peer_once() {
    let mut h = SyncHarness::new(SyncConfig::default(), 54);
    h.store_headers(54);
    h.store_blocks(49);
    let mut x = h.connect(54);

    h.sync.sync_block();
    assert_eq!(x.block_requests(), hashes(&h.chain[50..=54]));

    let mut z = h.connect(54);
    tokio::time::advance(Duration::from_secs(6)).await;
    h.sync.check_block_timeout();

    assert_eq!(x.peer.timeout_count(), 1);
    assert_eq!(z.peer.timeout_count(), 0);
    assert_eq!(z.block_requests(), hashes(&h.chain[50..=54]));
    assert!(x.block_requests().is_empty());
    assert_eq!(h.sync.block_request_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_blocks_are_not_retried() {
    let mut h = SyncHarness::new(SyncConfig::default(), 10);
    h.store_headers(10);
    let x = h.connect(10);
    h.sync.sync_block();

    // Blocks 1-4 reach the ledger by another route.
    h.store_blocks(4);
    let mut z = h.connect(10);
    tokio::time::advance(Duration::from_secs(6)).await;
    h.sync.check_block_timeout();

    assert_eq!(z.block_requests(), hashes(&h.chain[5..=10]));
    assert_eq!(h.sync.block_request_count(), 6);
    assert_eq!(x.peer.timeout_count(), 1);
}

#[test]
fn test_full_cache_stops_block_requests() {
    let config = SyncConfig {
        block_cache_capacity: 3,
        ..Default::default()
    };
    let mut h = SyncHarness::new(config, 10);
    h.store_headers(10);
    let mut x = h.connect(10);

    h.sync.sync_block();
    assert_eq!(x.block_requests(), hashes(&h.chain[1..=3]));
    for height in 1..=3 {
        h.deliver_block(x.id(), height);
    }
    assert_eq!(h.sync.cache_len(), 3);

    h.sync.sync_block();
    assert!(x.block_requests().is_empty());
    assert_eq!(h.sync.status().cache_len, 3);

    assert_eq!(h.sync.persist_ready_blocks(), 3);
    h.sync.sync_block();
    assert_eq!(x.block_requests(), hashes(&h.chain[4..=6]));
}

#[test]
fn test_block_batch_stops_at_peer_height() {
    let mut h = SyncHarness::new(SyncConfig::default(), 20);
    h.store_headers(20);
    let mut short = h.connect(8);

    h.sync.sync_block();
    assert_eq!(short.block_requests(), hashes(&h.chain[1..=8]));
}

#[test]
fn test_download_speed_feeds_peer_weight() {
    let mut h = SyncHarness::new(SyncConfig::default(), 3);
    h.store_headers(3);
    let x = h.connect(3);
    let before = x.peer.weight();

    h.sync.sync_block();
    h.deliver_block(x.id(), 1);
    assert_ne!(x.peer.weight(), before);
}

#[test]
fn test_cache_drains_into_ledger_in_order() {
    let mut h = SyncHarness::new(SyncConfig::default(), 6);
    h.store_headers(6);
    let x = h.connect(6);
    h.sync.sync_block();

    for height in [6, 2, 5, 1, 3, 4] {
        h.deliver_block(x.id(), height);
    }
    assert_eq!(h.sync.persist_ready_blocks(), 6);
    for height in 1..=6 {
        assert_eq!(
            h.ledger.block(height).as_ref(),
            Some(&h.chain[height as usize])
        );
    }
    let status = h.sync.status();
    assert_eq!(status.block_height, 6);
    assert_eq!(status.cache_len, 0);
    assert_eq!(status.block_requests_outstanding, 0);
}

#[test]
fn test_persisted_block_prunes_relay_pool() {
    let mut h = SyncHarness::new(SyncConfig::default(), 2);
    h.store_headers(2);
    let x = h.connect(2);

    let tx = h.chain[1].transactions[0].clone();
    assert_eq!(h.nodes.relay(tx.clone()), RelayResult::Accepted);

    h.sync.sync_block();
    h.deliver_block(x.id(), 1);
    h.sync.persist_ready_blocks();
    assert!(!h.nodes.relay_pool().contains(&tx.hash()));
    assert_eq!(h.nodes.relay(tx), RelayResult::AlreadyPersisted);
}
