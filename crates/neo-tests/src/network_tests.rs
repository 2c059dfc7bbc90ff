//! End-to-end sync over loopback TCP.

use crate::generators::test_chain;
use crate::harness::RemoteNode;
use neo_network::{NodeManager, NodeManagerConfig};
use neo_sync::{sync_channel, Ledger, MemoryLedger, SyncConfig, SyncManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct LocalNode {
    ledger: Arc<MemoryLedger>,
    nodes: Arc<NodeManager>,
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl LocalNode {
    fn start(seeds: Vec<SocketAddr>, sync: SyncConfig) -> Self {
        let shutdown = CancellationToken::new();
        let ledger = Arc::new(MemoryLedger::default());
        let (sync_tx, sync_rx) = sync_channel();
        let config = NodeManagerConfig {
            seed_list: seeds.iter().map(ToString::to_string).collect(),
            pool_check_interval: Duration::from_millis(200),
            ..Default::default()
        };
        let nodes = Arc::new(NodeManager::new(
            config,
            ledger.clone(),
            sync_tx,
            shutdown.child_token(),
        ));
        let sync = Arc::new(SyncManager::new(
            sync,
            ledger.clone(),
            Arc::clone(&nodes),
            sync_rx,
            shutdown.child_token(),
        ));

        let pool = Arc::clone(&nodes);
        let tasks = vec![
            tokio::spawn(async move {
                if let Err(e) = pool.run().await {
                    panic!("node manager failed: {e}");
                }
            }),
            tokio::spawn(async move {
                if let Err(e) = sync.run().await {
                    panic!("sync manager failed: {e}");
                }
            }),
        ];
        Self {
            ledger,
            nodes,
            shutdown,
            tasks,
        }
    }

    async fn wait_for_height(&self, height: u32, deadline: Duration) -> bool {
        let poll = async {
            while self.ledger.cur_block_height() < height {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(deadline, poll).await.is_ok()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

fn fast_sync() -> SyncConfig {
    SyncConfig {
        tick_interval: Duration::from_millis(20),
        block_request_limit: 16,
        ..Default::default()
    }
}

/// A port nothing listens on.
async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_syncs_full_chain_from_remote() {
    let chain = test_chain(60);
    let remote = RemoteNode::spawn(chain.clone()).await.unwrap();
    let local = LocalNode::start(vec![remote.addr], fast_sync());

    assert!(
        local.wait_for_height(60, Duration::from_secs(20)).await,
        "stuck at {}",
        local.ledger.cur_block_height()
    );
    assert_eq!(local.ledger.cur_header_height(), 60);
    for height in [1, 30, 60] {
        assert_eq!(
            local.ledger.header_hash_by_height(height),
            chain[height as usize].hash()
        );
    }
    assert!(remote.served_blocks() >= 60);
    assert_eq!(local.nodes.connected_addresses(), vec![remote.addr]);

    local.stop().await;
}

#[tokio::test]
async fn test_dead_seed_goes_bad_and_sync_continues() {
    let dead = dead_addr().await;
    let remote = RemoteNode::spawn(test_chain(10)).await.unwrap();
    let local = LocalNode::start(vec![dead, remote.addr], fast_sync());

    assert!(local.wait_for_height(10, Duration::from_secs(20)).await);

    // The failed dial may have been recycled by a pool check since.
    let bad = local.nodes.bad_addresses();
    let known = local.nodes.known_addresses();
    let queued = local.nodes.queued_addresses();
    assert!(bad.contains(&dead) || known.contains(&dead) || queued.contains(&dead));
    assert!(!local.nodes.connected_addresses().contains(&dead));

    local.stop().await;
}

#[tokio::test]
async fn test_shutdown_disconnects_peers() {
    let remote = RemoteNode::spawn(test_chain(5)).await.unwrap();
    let local = LocalNode::start(vec![remote.addr], fast_sync());
    assert!(local.wait_for_height(5, Duration::from_secs(20)).await);
    assert_eq!(local.nodes.node_count(), 1);

    let nodes = Arc::clone(&local.nodes);
    local.stop().await;
    assert_eq!(nodes.node_count(), 0);
    assert!(nodes.connected_addresses().is_empty());
}
