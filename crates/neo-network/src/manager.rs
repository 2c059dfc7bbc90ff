//! Connection pool management.
//!
//! The [`NodeManager`] keeps between `min_clients` and `max_clients` active
//! peers. Candidate addresses move through an admission pipeline:
//!
//! ```text
//!   discovered ──► queued ──► connected
//!                    │  ▲
//!                    ▼  │
//!               known / bad
//! ```
//!
//! `queued` holds dial attempts in flight (including quality probes),
//! `known` holds healthy addresses waiting for a free slot and `bad` holds
//! addresses that failed or misbehaved. The three sets and the set of
//! connected listen addresses are kept pairwise disjoint under one lock.

use crate::connection::Connection;
use crate::discovery::SeedResolver;
use crate::peer::{DisconnectReason, NodeEvent, Peer, PeerEvents, PeerId, PeerInfo, SyncEvent};
use crate::relay::{RelayPool, RelayResult, RelaySink};
use crate::{
    Block, ConnectionConfig, InvPayload, InventoryType, Message, NetworkAddressWithTime,
    NetworkError, NetworkResult, Transaction, VersionPayload, DEFAULT_PORT, MAX_ADDRESSES,
    NODE_NETWORK, PROTOCOL_VERSION,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Errors tolerated before a peer is replaced.
pub const MAX_ERROR_COUNT: u32 = 5;

/// Timeouts tolerated before a peer is replaced.
pub const MAX_TIMEOUT_COUNT: u32 = 15;

/// Unverified known addresses probed per pool check while the pool is full.
const PROBES_PER_CHECK: usize = 2;

const EVENT_QUEUE_SIZE: usize = 1000;

/// Per-request failure counts, consulted when picking a retry peer.
pub trait FailureHistory {
    fn failure_count(&self, peer: PeerId) -> u32;
}

impl FailureHistory for HashMap<PeerId, u32> {
    fn failure_count(&self, peer: PeerId) -> u32 {
        self.get(&peer).copied().unwrap_or(0)
    }
}

/// What a dial is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialMode {
    /// Join the pool on success.
    Pool,
    /// Handshake, report the verdict, disconnect.
    Probe,
}

/// Node manager configuration.
#[derive(Debug, Clone)]
pub struct NodeManagerConfig {
    pub connection: ConnectionConfig,
    /// P2P listen address; `None` disables inbound connections.
    pub bind_address: Option<SocketAddr>,
    /// `host:port` entries resolved at start-up.
    pub seed_list: Vec<String>,
    pub min_clients: usize,
    pub max_clients: usize,
    pub peer_query_interval: Duration,
    pub pool_check_interval: Duration,
    pub max_concurrent_dials: usize,
    pub user_agent: String,
}

impl Default for NodeManagerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            bind_address: None,
            seed_list: Vec::new(),
            min_clients: 4,
            max_clients: 10,
            peer_query_interval: Duration::from_secs(15),
            pool_check_interval: Duration::from_secs(10),
            max_concurrent_dials: 5,
            user_agent: format!("/neo-rust-node:{}/", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Connection pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub connected: usize,
    pub queued: usize,
    pub known: usize,
    pub bad: usize,
    pub relay_pool: usize,
}

#[derive(Debug, Default)]
struct AddressBook {
    queued: HashSet<SocketAddr>,
    bad: HashSet<SocketAddr>,
    /// Value records whether the address passed a quality probe.
    known: HashMap<SocketAddr, bool>,
    connected: HashMap<SocketAddr, PeerId>,
}

impl AddressBook {
    fn is_tracked(&self, addr: &SocketAddr) -> bool {
        self.queued.contains(addr)
            || self.bad.contains(addr)
            || self.known.contains_key(addr)
            || self.connected.contains_key(addr)
    }

    fn mark_bad(&mut self, addr: SocketAddr) {
        if self.connected.contains_key(&addr) {
            return;
        }
        self.queued.remove(&addr);
        self.known.remove(&addr);
        self.bad.insert(addr);
    }

    fn mark_known(&mut self, addr: SocketAddr, probed: bool) {
        if self.connected.contains_key(&addr) {
            return;
        }
        self.queued.remove(&addr);
        self.bad.remove(&addr);
        let entry = self.known.entry(addr).or_insert(false);
        *entry |= probed;
    }

    /// A known address to promote, preferring probed ones.
    fn pick_known(&self) -> Option<SocketAddr> {
        self.known
            .iter()
            .find(|(_, probed)| **probed)
            .or_else(|| self.known.iter().next())
            .map(|(addr, _)| *addr)
    }
}

/// Owner of the peer pool.
pub struct NodeManager {
    config: NodeManagerConfig,
    /// Nonce sent in `version`; a remote echoing it is ourselves.
    nonce: u32,
    next_peer_id: AtomicU64,
    nodes: DashMap<PeerId, Arc<Peer>>,
    book: Mutex<AddressBook>,
    relay: RelayPool,
    sink: Arc<dyn RelaySink>,
    events: PeerEvents,
    event_rx: Mutex<Option<mpsc::Receiver<NodeEvent>>>,
    dial_tx: mpsc::UnboundedSender<(SocketAddr, DialMode)>,
    dial_rx: Mutex<Option<mpsc::UnboundedReceiver<(SocketAddr, DialMode)>>>,
    dial_permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl NodeManager {
    /// Create a manager. Peers push sync traffic into `sync_tx`.
    pub fn new(
        config: NodeManagerConfig,
        sink: Arc<dyn RelaySink>,
        sync_tx: mpsc::Sender<SyncEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let (node_tx, node_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let (dial_tx, dial_rx) = mpsc::unbounded_channel();
        let dial_permits = Arc::new(Semaphore::new(config.max_concurrent_dials.max(1)));
        Self {
            config,
            nonce: rand::random(),
            next_peer_id: AtomicU64::new(1),
            nodes: DashMap::new(),
            book: Mutex::new(AddressBook::default()),
            relay: RelayPool::new(),
            sink,
            events: PeerEvents {
                node: node_tx,
                sync: sync_tx,
            },
            event_rx: Mutex::new(Some(node_rx)),
            dial_tx,
            dial_rx: Mutex::new(Some(dial_rx)),
            dial_permits,
            shutdown,
        }
    }

    pub fn config(&self) -> &NodeManagerConfig {
        &self.config
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    /// Channels handed to every peer of this pool.
    pub fn events(&self) -> PeerEvents {
        self.events.clone()
    }

    pub fn next_peer_id(&self) -> PeerId {
        PeerId(self.next_peer_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Cancellation token for a new peer, tied to the manager's shutdown.
    pub fn peer_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn relay_pool(&self) -> &RelayPool {
        &self.relay
    }

    pub fn local_version(&self) -> VersionPayload {
        VersionPayload {
            version: PROTOCOL_VERSION,
            services: NODE_NETWORK,
            timestamp: unix_time(),
            port: self.config.bind_address.map(|a| a.port()).unwrap_or(0),
            nonce: self.nonce,
            user_agent: self.config.user_agent.clone(),
            start_height: self.sink.start_height(),
            relay: true,
        }
    }

    fn is_local(&self, addr: &SocketAddr) -> bool {
        match self.config.bind_address {
            Some(bind) if bind == *addr => true,
            Some(bind) => {
                bind.port() == addr.port()
                    && (addr.ip().is_loopback() || addr.ip().is_unspecified())
                    && (bind.ip().is_loopback() || bind.ip().is_unspecified())
            }
            None => false,
        }
    }

    // ---- peer lookup & selection ----

    pub fn peer(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.nodes.get(&id).map(|r| Arc::clone(r.value()))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Active peers, highest weight first.
    fn ranked_nodes(&self) -> Vec<Arc<Peer>> {
        let mut ranked: Vec<(f64, Arc<Peer>)> = self
            .nodes
            .iter()
            .filter(|r| r.is_active())
            .map(|r| (r.weight(), Arc::clone(r.value())))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranked.into_iter().map(|(_, peer)| peer).collect()
    }

    /// Highest-weight peer whose best height reaches `min_height`.
    ///
    /// `None` means the caller should wait, not fail.
    pub fn get_next_node(&self, min_height: u32) -> Option<Arc<Peer>> {
        self.ranked_nodes()
            .into_iter()
            .find(|peer| peer.best_height() >= min_height)
    }

    /// Pick a peer for a retry of a request with the given failure history.
    ///
    /// The first qualifying peer (by weight) that never failed this request
    /// wins; if all have failed, the least-failed one is returned.
    pub fn get_node_with_min_failed_time<H: FailureHistory + ?Sized>(
        &self,
        history: &H,
        min_height: u32,
    ) -> Option<Arc<Peer>> {
        let mut best: Option<(u32, Arc<Peer>)> = None;
        for peer in self
            .ranked_nodes()
            .into_iter()
            .filter(|peer| peer.best_height() >= min_height)
        {
            let failures = history.failure_count(peer.id());
            if failures == 0 {
                return Some(peer);
            }
            if best.as_ref().map_or(true, |(least, _)| failures < *least) {
                best = Some((failures, peer));
            }
        }
        best.map(|(_, peer)| peer)
    }

    // ---- penalties ----

    /// Count an error against a peer; replaces it above [`MAX_ERROR_COUNT`].
    ///
    /// Returns whether the peer was replaced.
    pub fn increase_peer_error_count(&self, id: PeerId) -> bool {
        let Some(peer) = self.peer(id) else {
            return false;
        };
        let count = peer.record_error();
        if count > MAX_ERROR_COUNT {
            warn!(peer = %id, errors = count, "Too many errors");
            self.replace_node(id);
            return true;
        }
        false
    }

    /// Count a timeout against a peer; replaces it above [`MAX_TIMEOUT_COUNT`].
    pub fn increase_peer_timeout_count(&self, id: PeerId) -> bool {
        let Some(peer) = self.peer(id) else {
            return false;
        };
        let count = peer.record_timeout();
        if count > MAX_TIMEOUT_COUNT {
            warn!(peer = %id, timeouts = count, "Too many timeouts");
            self.replace_node(id);
            return true;
        }
        false
    }

    /// Disconnect a peer, mark its address bad and promote a known address.
    pub fn replace_node(&self, id: PeerId) {
        let Some((_, peer)) = self.nodes.remove(&id) else {
            return;
        };
        peer.disconnect(DisconnectReason::Replaced);

        let mut book = self.book.lock();
        if let Some(listen) = peer.listen_addr() {
            if book.connected.get(&listen) == Some(&id) {
                book.connected.remove(&listen);
            }
            book.mark_bad(listen);
        }
        match book.pick_known() {
            Some(addr) => {
                info!(peer = %id, replacement = %addr, "Replacing peer");
                self.enqueue_dial(&mut book, addr, DialMode::Pool);
            }
            None => info!(peer = %id, "Peer removed, no known address to replace it"),
        }
    }

    // ---- admission pipeline ----

    fn enqueue_dial(&self, book: &mut AddressBook, addr: SocketAddr, mode: DialMode) {
        book.known.remove(&addr);
        book.bad.remove(&addr);
        book.queued.insert(addr);
        // Only fails once the dial loop is gone, i.e. during shutdown.
        let _ = self.dial_tx.send((addr, mode));
    }

    /// Admit newly discovered addresses.
    ///
    /// Addresses go to the dial queue while pool slots are open; once the
    /// pool (connected plus in-flight dials) is full they are parked in
    /// `known` instead. Returns how many addresses were new.
    pub fn add_addresses(&self, addresses: impl IntoIterator<Item = SocketAddr>) -> usize {
        let mut book = self.book.lock();
        let mut added = 0;
        for addr in addresses {
            if self.is_local(&addr) || book.is_tracked(&addr) {
                continue;
            }
            added += 1;
            if self.nodes.len() + book.queued.len() < self.config.max_clients {
                self.enqueue_dial(&mut book, addr, DialMode::Pool);
            } else {
                book.known.insert(addr, false);
            }
        }
        added
    }

    /// Queue one address for an immediate dial, regardless of its history.
    ///
    /// Returns `false` if it is local, already connected or already queued.
    pub fn connect_to(&self, addr: SocketAddr) -> bool {
        let mut book = self.book.lock();
        if self.is_local(&addr) || book.connected.contains_key(&addr) || book.queued.contains(&addr)
        {
            return false;
        }
        self.enqueue_dial(&mut book, addr, DialMode::Pool);
        true
    }

    /// Add a handshaken peer to the pool.
    pub fn register_peer(&self, peer: Arc<Peer>) -> NetworkResult<()> {
        let mut book = self.book.lock();
        if self.nodes.len() >= self.config.max_clients {
            return Err(NetworkError::TooManyConnections {
                count: self.nodes.len(),
                max: self.config.max_clients,
            });
        }
        if let Some(listen) = peer.listen_addr() {
            if book.connected.contains_key(&listen) {
                return Err(NetworkError::ConnectionFailed(format!(
                    "{listen} already connected"
                )));
            }
            book.queued.remove(&listen);
            book.known.remove(&listen);
            book.bad.remove(&listen);
            book.connected.insert(listen, peer.id());
        }
        info!(
            peer = %peer.id(),
            addr = %peer.addr(),
            height = peer.best_height(),
            inbound = peer.is_inbound(),
            "Peer connected"
        );
        self.nodes.insert(peer.id(), peer);
        Ok(())
    }

    /// Drop a peer whose session ended.
    pub fn on_peer_disconnected(&self, id: PeerId, reason: DisconnectReason) {
        let Some((_, peer)) = self.nodes.remove(&id) else {
            return;
        };
        let mut book = self.book.lock();
        if let Some(listen) = peer.listen_addr() {
            if book.connected.get(&listen) == Some(&id) {
                book.connected.remove(&listen);
            }
            match reason {
                DisconnectReason::ProtocolViolation | DisconnectReason::Replaced => {
                    book.mark_bad(listen)
                }
                DisconnectReason::Closed | DisconnectReason::Stalled => {
                    book.mark_known(listen, false)
                }
                DisconnectReason::Shutdown => {}
            }
        }
        info!(peer = %id, addr = %peer.addr(), ?reason, remaining = self.nodes.len(), "Peer disconnected");
    }

    /// One pass of pool maintenance.
    ///
    /// Fills open slots from `known` (probed entries first). With the pool
    /// full, probes a few unverified known addresses instead. Below
    /// `min_clients` with nothing left to try, bad addresses are recycled
    /// into `known`.
    pub fn check_pool(&self) {
        let connected = self.nodes.len();
        let mut book = self.book.lock();
        let open = self
            .config
            .max_clients
            .saturating_sub(connected + book.queued.len());

        if open > 0 {
            let mut candidates: Vec<(SocketAddr, bool)> =
                book.known.iter().map(|(a, p)| (*a, *p)).collect();
            candidates.sort_by_key(|(_, probed)| !*probed);
            for (addr, _) in candidates.into_iter().take(open) {
                self.enqueue_dial(&mut book, addr, DialMode::Pool);
            }
        } else {
            let unverified: Vec<SocketAddr> = book
                .known
                .iter()
                .filter(|(_, probed)| !**probed)
                .map(|(a, _)| *a)
                .take(PROBES_PER_CHECK)
                .collect();
            for addr in unverified {
                self.enqueue_dial(&mut book, addr, DialMode::Probe);
            }
        }

        if connected < self.config.min_clients
            && book.known.is_empty()
            && book.queued.is_empty()
            && !book.bad.is_empty()
        {
            warn!(bad = book.bad.len(), "Address pool exhausted, retrying bad addresses");
            let bad = std::mem::take(&mut book.bad);
            for addr in bad {
                book.known.insert(addr, false);
            }
        }

        debug!(
            connected,
            queued = book.queued.len(),
            known = book.known.len(),
            bad = book.bad.len(),
            "Pool check"
        );
    }

    /// Ask every peer for its address list.
    pub fn query_peers(&self) {
        for peer in self.ranked_nodes() {
            if let Err(e) = peer.get_address_list() {
                debug!(peer = %peer.id(), error = %e, "Address query failed");
            }
        }
    }

    // ---- relay ----

    /// Submit a locally originated transaction.
    pub fn relay(&self, tx: Transaction) -> RelayResult {
        self.relay_from(tx, None)
    }

    fn relay_from(&self, tx: Transaction, origin: Option<PeerId>) -> RelayResult {
        let hash = tx.hash();
        let result = self.relay.submit(tx, self.sink.as_ref());
        if result == RelayResult::Accepted {
            let inv = Message::Inv(InvPayload::new(InventoryType::Tx, vec![hash]));
            for peer in self.ranked_nodes() {
                if Some(peer.id()) == origin {
                    continue;
                }
                if let Err(e) = peer.send(inv.clone()) {
                    debug!(peer = %peer.id(), error = %e, "Relay announce failed");
                }
            }
        } else {
            debug!(tx = %hash, ?result, "Transaction not relayed");
        }
        result
    }

    /// Prune relayed transactions included in a persisted block.
    pub fn on_block_persisted(&self, block: &Block) {
        let removed = self.relay.remove_block(block);
        if removed > 0 {
            debug!(height = block.index(), removed, "Pruned relay pool");
        }
    }

    // ---- events ----

    /// Handle one event pushed by a peer.
    pub fn handle_event(&self, event: NodeEvent) {
        match event {
            NodeEvent::Addresses { peer, addresses } => {
                let added = self.add_addresses(addresses);
                debug!(peer = %peer, added, "Received addresses");
            }
            NodeEvent::AddressRequest { peer } => self.answer_address_request(peer),
            NodeEvent::Inventory { peer, inv } => {
                if inv.inv_type != InventoryType::Tx {
                    return;
                }
                let Some(node) = self.peer(peer) else { return };
                let wanted: Vec<_> = inv
                    .hashes
                    .into_iter()
                    .filter(|h| !self.relay.contains(h) && !self.sink.contains(h))
                    .collect();
                if let Err(e) = node.get_data(InventoryType::Tx, wanted) {
                    debug!(peer = %peer, error = %e, "Transaction request failed");
                }
            }
            NodeEvent::DataRequest { peer, inv } => {
                if inv.inv_type != InventoryType::Tx {
                    debug!(peer = %peer, inv_type = ?inv.inv_type, "Ignoring data request");
                    return;
                }
                let Some(node) = self.peer(peer) else { return };
                for tx in inv.hashes.iter().filter_map(|h| self.relay.get(h)) {
                    if let Err(e) = node.send(Message::Tx(tx)) {
                        debug!(peer = %peer, error = %e, "Serving transaction failed");
                        break;
                    }
                }
            }
            NodeEvent::Transaction { peer, tx } => {
                self.relay_from(tx, Some(peer));
            }
            NodeEvent::Disconnected { peer, reason, .. } => {
                self.on_peer_disconnected(peer, reason);
            }
        }
    }

    fn answer_address_request(&self, requester: PeerId) {
        let Some(node) = self.peer(requester) else {
            return;
        };
        let now = unix_time();
        let addresses: Vec<_> = {
            let book = self.book.lock();
            book.connected
                .iter()
                .filter(|(_, id)| **id != requester)
                .map(|(addr, _)| *addr)
                .chain(book.known.keys().copied())
                .take(MAX_ADDRESSES as usize)
                .map(|addr| NetworkAddressWithTime::new(addr, now))
                .collect()
        };
        if let Err(e) = node.send(Message::Addr(addresses)) {
            debug!(peer = %requester, error = %e, "Address reply failed");
        }
    }

    // ---- observability ----

    pub fn stats(&self) -> PoolStats {
        let book = self.book.lock();
        PoolStats {
            connected: self.nodes.len(),
            queued: book.queued.len(),
            known: book.known.len(),
            bad: book.bad.len(),
            relay_pool: self.relay.len(),
        }
    }

    pub fn connected_peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<_> = self.nodes.iter().map(|r| r.info()).collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    pub fn queued_addresses(&self) -> Vec<SocketAddr> {
        sorted(self.book.lock().queued.iter().copied())
    }

    pub fn known_addresses(&self) -> Vec<SocketAddr> {
        sorted(self.book.lock().known.keys().copied())
    }

    pub fn bad_addresses(&self) -> Vec<SocketAddr> {
        sorted(self.book.lock().bad.iter().copied())
    }

    /// Listen addresses of connected peers.
    pub fn connected_addresses(&self) -> Vec<SocketAddr> {
        sorted(self.book.lock().connected.keys().copied())
    }

    // ---- tasks ----

    /// Run the pool until the shutdown token fires.
    ///
    /// Binds the listener, queues the seeds and drives the dial loop, the
    /// event loop and the maintenance timers.
    pub async fn run(self: Arc<Self>) -> NetworkResult<()> {
        let event_rx = self
            .event_rx
            .lock()
            .take()
            .ok_or_else(|| NetworkError::Service("node manager already running".into()))?;
        let dial_rx = self
            .dial_rx
            .lock()
            .take()
            .ok_or_else(|| NetworkError::Service("node manager already running".into()))?;

        let listener = match self.config.bind_address {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!(addr = %addr, "P2P listener bound");
                Some(listener)
            }
            None => None,
        };

        let mut tasks = JoinSet::new();
        tasks.spawn(Arc::clone(&self).dial_loop(dial_rx));
        tasks.spawn(Arc::clone(&self).event_loop(event_rx));
        if let Some(listener) = listener {
            tasks.spawn(Arc::clone(&self).listen_loop(listener));
        }

        let seeds = SeedResolver::new(self.config.seed_list.clone(), DEFAULT_PORT)
            .resolve_all()
            .await;
        let added = self.add_addresses(seeds);
        info!(added, "Seed addresses queued");

        tasks.spawn(Arc::clone(&self).maintenance_loop());

        self.shutdown.cancelled().await;
        self.disconnect_all();
        while tasks.join_next().await.is_some() {}
        info!("Node manager stopped");
        Ok(())
    }

    /// Disconnect every peer.
    pub fn disconnect_all(&self) {
        let ids: Vec<PeerId> = self.nodes.iter().map(|r| *r.key()).collect();
        for id in ids {
            if let Some((_, peer)) = self.nodes.remove(&id) {
                peer.disconnect(DisconnectReason::Shutdown);
            }
        }
        self.book.lock().connected.clear();
    }

    async fn dial_loop(self: Arc<Self>, mut dial_rx: mpsc::UnboundedReceiver<(SocketAddr, DialMode)>) {
        loop {
            let (addr, mode) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = dial_rx.recv() => match next {
                    Some(job) => job,
                    None => break,
                },
            };
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.dial_permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let manager = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                manager.dial(addr, mode).await;
            });
        }
    }

    async fn dial(self: &Arc<Self>, addr: SocketAddr, mode: DialMode) {
        if let Err(e) = self.establish(addr, mode).await {
            debug!(addr = %addr, ?mode, error = %e, "Dial failed");
            self.book.lock().mark_bad(addr);
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn establish(self: &Arc<Self>, addr: SocketAddr, mode: DialMode) -> NetworkResult<()> {
        let mut connection = Connection::connect(addr, &self.config.connection).await?;
        let (peer, outbound_rx) = Peer::new(self.next_peer_id(), addr, false, self.peer_token());
        peer.handshake(
            &mut connection,
            &self.local_version(),
            self.config.connection.handshake_timeout,
        )
        .await?;

        match mode {
            DialMode::Probe => {
                debug!(addr = %addr, height = peer.best_height(), "Probe succeeded");
                self.book.lock().mark_known(addr, true);
                peer.disconnect(DisconnectReason::Shutdown);
                let _ = connection.close().await;
                Ok(())
            }
            DialMode::Pool => match self.register_peer(Arc::clone(&peer)) {
                Ok(()) => {
                    peer.start(
                        connection,
                        outbound_rx,
                        self.events(),
                        self.config.connection.read_timeout,
                    );
                    Ok(())
                }
                Err(NetworkError::TooManyConnections { .. }) => {
                    // Healthy, but the pool filled up while we dialed.
                    self.book.lock().mark_known(addr, true);
                    peer.disconnect(DisconnectReason::Shutdown);
                    let _ = connection.close().await;
                    Ok(())
                }
                Err(e) => {
                    peer.disconnect(DisconnectReason::Shutdown);
                    Err(e)
                }
            },
        }
    }

    async fn listen_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        tokio::spawn(Arc::clone(&self).accept(stream, remote));
                    }
                    Err(e) => warn!(error = %e, "Accept error"),
                },
            }
        }
    }

    async fn accept(self: Arc<Self>, stream: TcpStream, remote: SocketAddr) {
        if self.nodes.len() >= self.config.max_clients {
            debug!(addr = %remote, "Pool full, rejecting inbound peer");
            return;
        }
        let mut connection = Connection::new(stream, remote, self.config.connection.magic);
        let (peer, outbound_rx) = Peer::new(self.next_peer_id(), remote, true, self.peer_token());
        if let Err(e) = peer
            .handshake(
                &mut connection,
                &self.local_version(),
                self.config.connection.handshake_timeout,
            )
            .await
        {
            debug!(addr = %remote, error = %e, "Inbound handshake failed");
            return;
        }
        match self.register_peer(Arc::clone(&peer)) {
            Ok(()) => peer.start(
                connection,
                outbound_rx,
                self.events(),
                self.config.connection.read_timeout,
            ),
            Err(e) => {
                debug!(addr = %remote, error = %e, "Inbound peer rejected");
                peer.disconnect(DisconnectReason::Shutdown);
            }
        }
    }

    async fn event_loop(self: Arc<Self>, mut event_rx: mpsc::Receiver<NodeEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = event_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut query = tokio::time::interval(self.config.peer_query_interval);
        let mut check = tokio::time::interval(self.config.pool_check_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = query.tick() => self.query_peers(),
                _ = check.tick() => self.check_pool(),
            }
        }
    }
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn sorted(iter: impl Iterator<Item = SocketAddr>) -> Vec<SocketAddr> {
    let mut v: Vec<_> = iter.collect();
    v.sort();
    v
}
