//! Test harness for integration tests.
//!
//! Provides a fully wired sync stack whose peers are scripted in memory
//! (the test reads what the node sends them and injects their answers), and
//! a [`RemoteNode`] that serves a chain over real TCP.

use crate::generators::{test_addr, test_chain, version_payload};
use neo_network::serialize::Serializable;
use neo_network::{
    Block, Connection, Hash256, InventoryType, Message, NodeManager, NodeManagerConfig, Peer,
    PeerId, MAINNET_MAGIC, MAX_HEADERS,
};
use neo_sync::{sync_channel, Ledger, MemoryLedger, SyncConfig, SyncManager};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A handshaken peer whose socket is replaced by its outbound queue.
pub struct ScriptedPeer {
    pub peer: Arc<Peer>,
    outbound: mpsc::Receiver<Message>,
}

impl ScriptedPeer {
    pub fn id(&self) -> PeerId {
        self.peer.id()
    }

    /// Everything the node queued for this peer since the last call.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Start hashes of every `getheaders` queued since the last drain.
    pub fn header_requests(&mut self) -> Vec<Hash256> {
        self.drain()
            .into_iter()
            .filter_map(|message| match message {
                Message::GetHeaders(payload) => payload.hash_start.first().copied(),
                _ => None,
            })
            .collect()
    }

    /// Block hashes of every `getdata(block)` queued since the last drain.
    pub fn block_requests(&mut self) -> Vec<Hash256> {
        self.drain()
            .into_iter()
            .filter_map(|message| match message {
                Message::GetData(inv) if inv.inv_type == InventoryType::Block => Some(inv.hashes),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// Ledger, pool and synchronizer wired together without sockets.
pub struct SyncHarness {
    pub ledger: Arc<MemoryLedger>,
    pub nodes: Arc<NodeManager>,
    pub sync: Arc<SyncManager>,
    /// Chain the scripted peers pretend to have.
    pub chain: Vec<Block>,
    next_port: u16,
}

impl SyncHarness {
    pub fn new(config: SyncConfig, chain_len: u32) -> Self {
        Self::with_pool(config, NodeManagerConfig::default(), chain_len)
    }

    pub fn with_pool(config: SyncConfig, pool: NodeManagerConfig, chain_len: u32) -> Self {
        let ledger = Arc::new(MemoryLedger::default());
        let (sync_tx, sync_rx) = sync_channel();
        let nodes = Arc::new(NodeManager::new(
            pool,
            ledger.clone(),
            sync_tx,
            CancellationToken::new(),
        ));
        let sync = Arc::new(SyncManager::new(
            config,
            ledger.clone(),
            Arc::clone(&nodes),
            sync_rx,
            CancellationToken::new(),
        ));
        Self {
            ledger,
            nodes,
            sync,
            chain: test_chain(chain_len),
            next_port: 1,
        }
    }

    /// Register an active peer advertising `height`.
    pub fn connect(&mut self, height: u32) -> ScriptedPeer {
        let port = self.next_port;
        self.next_port += 1;
        let (peer, outbound) = Peer::new(
            self.nodes.next_peer_id(),
            test_addr(port),
            false,
            self.nodes.peer_token(),
        );
        peer.activate(version_payload(u32::from(port), port, height));
        if let Err(e) = self.nodes.register_peer(Arc::clone(&peer)) {
            panic!("register scripted peer: {e}");
        }
        ScriptedPeer { peer, outbound }
    }

    /// Store headers up to `height` directly in the ledger.
    pub fn store_headers(&self, height: u32) {
        let headers: Vec<_> = self.chain[1..=height as usize]
            .iter()
            .map(|b| b.header.clone())
            .collect();
        let accepted = self.ledger.add_headers(&headers);
        assert_eq!(accepted, headers.len(), "headers must link onto the tip");
    }

    /// Store blocks up to `height` directly in the ledger.
    pub fn store_blocks(&self, height: u32) {
        let from = self.ledger.cur_block_height() + 1;
        for block in &self.chain[from as usize..=height as usize] {
            if let Err(e) = self.ledger.add_block(&block.to_bytes()) {
                panic!("store block {}: {e}", block.index());
            }
        }
    }

    /// Deliver block `height` from `peer` as if it came off the wire.
    pub fn deliver_block(&self, peer: PeerId, height: u32) {
        let block = self.chain[height as usize].clone();
        let raw = block.to_bytes();
        self.sync.on_block_received(peer, block, raw);
    }
}

/// A remote node serving a fixed chain over TCP.
///
/// Answers `getheaders`, `getdata(block)` and `getaddr`; everything else is
/// ignored.
pub struct RemoteNode {
    pub addr: SocketAddr,
    served_blocks: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

/// Nonce every [`RemoteNode`] advertises.
const REMOTE_NONCE: u32 = 0x5EED_0001;

impl RemoteNode {
    pub async fn spawn(chain: Vec<Block>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let served_blocks = Arc::new(AtomicUsize::new(0));
        let chain = Arc::new(chain);

        let counter = Arc::clone(&served_blocks);
        let task = tokio::spawn(async move {
            while let Ok((stream, peer_addr)) = listener.accept().await {
                let chain = Arc::clone(&chain);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let connection = Connection::new(stream, peer_addr, MAINNET_MAGIC);
                    serve(connection, chain, counter, addr.port()).await;
                });
            }
        });

        Ok(Self {
            addr,
            served_blocks,
            task,
        })
    }

    pub fn served_blocks(&self) -> usize {
        self.served_blocks.load(Ordering::Relaxed)
    }
}

impl Drop for RemoteNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut connection: Connection,
    chain: Arc<Vec<Block>>,
    served: Arc<AtomicUsize>,
    port: u16,
) {
    let tip = (chain.len() - 1) as u32;
    let local = version_payload(REMOTE_NONCE, port, tip);
    if let Err(e) = connection.handshake(&local, Duration::from_secs(5)).await {
        debug!(error = %e, "Remote handshake failed");
        return;
    }

    let by_hash: HashMap<Hash256, usize> = chain
        .iter()
        .enumerate()
        .map(|(i, block)| (block.hash(), i))
        .collect();

    loop {
        let message = match connection.receive(Duration::from_secs(30)).await {
            Ok(message) => message,
            Err(_) => return,
        };
        let replies = match message {
            Message::GetHeaders(payload) => {
                let start = payload
                    .hash_start
                    .first()
                    .and_then(|hash| by_hash.get(hash))
                    .map_or(chain.len(), |i| i + 1);
                let end = chain.len().min(start + MAX_HEADERS as usize);
                let headers = chain[start.min(end)..end]
                    .iter()
                    .map(|b| b.header.clone())
                    .collect();
                vec![Message::Headers(headers)]
            }
            Message::GetData(inv) if inv.inv_type == InventoryType::Block => inv
                .hashes
                .iter()
                .filter_map(|hash| by_hash.get(hash))
                .map(|i| Message::Block(chain[*i].clone()))
                .collect(),
            Message::GetAddr => vec![Message::Addr(Vec::new())],
            _ => Vec::new(),
        };
        for reply in replies {
            if matches!(reply, Message::Block(_)) {
                served.fetch_add(1, Ordering::Relaxed);
            }
            if connection.send(&reply).await.is_err() {
                return;
            }
        }
    }
}
