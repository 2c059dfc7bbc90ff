//! Peer sessions.
//!
//! A [`Peer`] is created once a socket is established, runs the handshake,
//! and then owns two tasks: a read loop that dispatches inbound messages to
//! the node and sync managers, and a writer draining an outbound queue.
//! Request helpers only enqueue; responses come back through the read loop.

use crate::connection::{Connection, ConnectionReader, ConnectionWriter};
use crate::weight::PeerWeight;
use crate::{
    Block, GetBlocksPayload, Hash256, Header, InvPayload, InventoryType, Message, NetworkError,
    NetworkResult, Transaction, VersionPayload,
};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Capacity of a peer's outbound queue.
const OUTBOUND_QUEUE_SIZE: usize = 100;

/// Pool-unique peer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Peer connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    /// Transport established, nothing exchanged yet.
    Connecting,
    /// Version/verack exchange in progress.
    Handshaking,
    /// Handshake done, read loop running.
    Active,
    /// Terminal.
    Disconnected,
}

/// Why a peer left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Remote closed the socket or a write failed.
    Closed,
    /// Nothing received within the read timeout.
    Stalled,
    /// Malformed or corrupt data.
    ProtocolViolation,
    /// Evicted by the manager for too many errors or timeouts.
    Replaced,
    /// Local shutdown.
    Shutdown,
}

/// Events routed to the node manager.
#[derive(Debug)]
pub enum NodeEvent {
    Addresses {
        peer: PeerId,
        addresses: Vec<SocketAddr>,
    },
    AddressRequest {
        peer: PeerId,
    },
    /// Transaction inventory announced by a peer.
    Inventory {
        peer: PeerId,
        inv: InvPayload,
    },
    DataRequest {
        peer: PeerId,
        inv: InvPayload,
    },
    Transaction {
        peer: PeerId,
        tx: Transaction,
    },
    Disconnected {
        peer: PeerId,
        addr: SocketAddr,
        reason: DisconnectReason,
    },
}

/// Events routed to the sync manager.
#[derive(Debug)]
pub enum SyncEvent {
    Headers {
        peer: PeerId,
        headers: Vec<Header>,
    },
    Block {
        peer: PeerId,
        block: Block,
        /// Payload exactly as received.
        raw: Bytes,
    },
}

/// Channels a peer pushes its events into.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    pub node: mpsc::Sender<NodeEvent>,
    pub sync: mpsc::Sender<SyncEvent>,
}

/// Snapshot of a peer for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub inbound: bool,
    pub state: PeerState,
    pub user_agent: Option<String>,
    pub best_height: u32,
    pub weight: f64,
    pub error_count: u32,
    pub timeout_count: u32,
}

/// One remote node.
pub struct Peer {
    id: PeerId,
    addr: SocketAddr,
    inbound: bool,
    state: RwLock<PeerState>,
    remote: RwLock<Option<VersionPayload>>,
    best_height: AtomicU32,
    weight: Mutex<PeerWeight>,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
    reason: Mutex<Option<DisconnectReason>>,
}

impl Peer {
    /// Create a peer in `Connecting` state.
    ///
    /// The returned receiver is the outbound queue; [`Peer::start`] hands it
    /// to the writer task.
    pub fn new(
        id: PeerId,
        addr: SocketAddr,
        inbound: bool,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let peer = Arc::new(Self {
            id,
            addr,
            inbound,
            state: RwLock::new(PeerState::Connecting),
            remote: RwLock::new(None),
            best_height: AtomicU32::new(0),
            weight: Mutex::new(PeerWeight::new()),
            outbound,
            cancel,
            reason: Mutex::new(None),
        });
        (peer, rx)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Transport address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    /// Address other nodes can dial to reach this peer.
    ///
    /// Outbound peers were dialed at `addr`; inbound peers advertise their
    /// listening port in `version` (0 means not listening).
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        if !self.inbound {
            return Some(self.addr);
        }
        match self.remote.read().as_ref() {
            Some(v) if v.port != 0 => Some(SocketAddr::new(self.addr.ip(), v.port)),
            _ => None,
        }
    }

    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() == PeerState::Active
    }

    pub fn remote_version(&self) -> Option<VersionPayload> {
        self.remote.read().clone()
    }

    pub fn best_height(&self) -> u32 {
        self.best_height.load(Ordering::Acquire)
    }

    /// Raise the advertised best height; never lowers it.
    pub fn update_height(&self, height: u32) {
        let previous = self.best_height.fetch_max(height, Ordering::AcqRel);
        if height > previous {
            trace!(peer = %self.id, height, "Best height raised");
        }
    }

    pub fn weight(&self) -> f64 {
        self.weight.lock().weight()
    }

    pub fn append_speed(&self, bytes_per_sec: f64) {
        self.weight.lock().append_speed(bytes_per_sec);
    }

    /// Increment the error counter, returning the new value.
    pub fn record_error(&self) -> u32 {
        self.weight.lock().increment_errors()
    }

    /// Increment the timeout counter, returning the new value.
    pub fn record_timeout(&self) -> u32 {
        self.weight.lock().increment_timeouts()
    }

    pub fn error_count(&self) -> u32 {
        self.weight.lock().error_count()
    }

    pub fn timeout_count(&self) -> u32 {
        self.weight.lock().timeout_count()
    }

    /// Cancellation token covering every task this peer owns.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        *self.reason.lock()
    }

    pub fn info(&self) -> PeerInfo {
        let weight = self.weight.lock();
        PeerInfo {
            id: self.id,
            addr: self.addr,
            inbound: self.inbound,
            state: self.state(),
            user_agent: self.remote.read().as_ref().map(|v| v.user_agent.clone()),
            best_height: self.best_height(),
            weight: weight.weight(),
            error_count: weight.error_count(),
            timeout_count: weight.timeout_count(),
        }
    }

    /// Mark the handshake as done with the given remote version.
    pub fn activate(&self, remote: VersionPayload) {
        self.best_height
            .fetch_max(remote.start_height, Ordering::AcqRel);
        *self.remote.write() = Some(remote);
        *self.state.write() = PeerState::Active;
    }

    /// Run the version/verack exchange on `connection`.
    ///
    /// Any failure leaves the peer `Disconnected`.
    pub async fn handshake(
        &self,
        connection: &mut Connection,
        local: &VersionPayload,
        timeout: Duration,
    ) -> NetworkResult<()> {
        *self.state.write() = PeerState::Handshaking;
        match connection.handshake(local, timeout).await {
            Ok(remote) => {
                self.activate(remote);
                Ok(())
            }
            Err(e) => {
                let reason = if e.is_protocol_violation() {
                    DisconnectReason::ProtocolViolation
                } else {
                    DisconnectReason::Closed
                };
                self.disconnect(reason);
                Err(e)
            }
        }
    }

    /// Spawn the read loop and the writer.
    pub fn start(
        self: &Arc<Self>,
        connection: Connection,
        outbound_rx: mpsc::Receiver<Message>,
        events: PeerEvents,
        read_timeout: Duration,
    ) {
        let (reader, writer) = connection.split();
        tokio::spawn(Arc::clone(self).write_loop(writer, outbound_rx));
        tokio::spawn(Arc::clone(self).read_loop(reader, events, read_timeout));
    }

    /// Tear down: cancel every task. The first reason given sticks.
    pub fn disconnect(&self, reason: DisconnectReason) {
        {
            let mut current = self.reason.lock();
            if current.is_none() {
                *current = Some(reason);
            }
        }
        let previous = std::mem::replace(&mut *self.state.write(), PeerState::Disconnected);
        if previous != PeerState::Disconnected {
            debug!(peer = %self.id, addr = %self.addr, ?reason, "Disconnecting peer");
        }
        self.cancel.cancel();
    }

    /// Queue a message for the writer.
    pub fn send(&self, message: Message) -> NetworkResult<()> {
        if self.state() == PeerState::Disconnected {
            return Err(NetworkError::ConnectionClosed);
        }
        self.outbound
            .try_send(message)
            .map_err(|e| NetworkError::SendQueue(format!("{}: {}", self.id, e)))
    }

    /// Ask for headers following `hash_start`.
    pub fn get_headers(&self, hash_start: Hash256) -> NetworkResult<()> {
        self.weight.lock().append_request_time();
        self.send(Message::GetHeaders(GetBlocksPayload::from_hash(hash_start)))
    }

    /// Ask for block inventory following `hash_start`.
    pub fn get_blocks(&self, hash_start: Hash256) -> NetworkResult<()> {
        self.weight.lock().append_request_time();
        self.send(Message::GetBlocks(GetBlocksPayload::from_hash(hash_start)))
    }

    /// Ask for the given inventory items.
    pub fn get_data(&self, inv_type: InventoryType, hashes: Vec<Hash256>) -> NetworkResult<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        if inv_type == InventoryType::Block {
            self.weight.lock().append_request_time();
        }
        self.send(Message::GetData(InvPayload::new(inv_type, hashes)))
    }

    /// Ask for the peer's known addresses.
    pub fn get_address_list(&self) -> NetworkResult<()> {
        self.send(Message::GetAddr)
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: ConnectionWriter,
        mut outbound_rx: mpsc::Receiver<Message>,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = outbound_rx.recv() => {
                    let Some(message) = next else { break };
                    if let Err(e) = writer.send(&message).await {
                        debug!(peer = %self.id, error = %e, "Send failed");
                        self.disconnect(DisconnectReason::Closed);
                        break;
                    }
                }
            }
        }
        let _ = writer.close().await;
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: ConnectionReader,
        events: PeerEvents,
        read_timeout: Duration,
    ) {
        let reason = loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break DisconnectReason::Shutdown,
                received = reader.receive(read_timeout) => received,
            };
            match received {
                Ok((message, raw)) => self.dispatch(message, raw.payload, &events).await,
                Err(e) if e.is_timeout() => {
                    warn!(peer = %self.id, timeout = ?read_timeout, "Peer stalled");
                    break DisconnectReason::Stalled;
                }
                Err(NetworkError::ConnectionClosed) => break DisconnectReason::Closed,
                Err(e) if e.is_protocol_violation() => {
                    warn!(peer = %self.id, error = %e, "Protocol violation");
                    break DisconnectReason::ProtocolViolation;
                }
                Err(e) => {
                    debug!(peer = %self.id, error = %e, "Receive error");
                    break DisconnectReason::Closed;
                }
            }
        };

        self.disconnect(reason);
        let reason = self.disconnect_reason().unwrap_or(reason);
        let _ = events
            .node
            .send(NodeEvent::Disconnected {
                peer: self.id,
                addr: self.addr,
                reason,
            })
            .await;
    }

    /// Route one inbound message.
    async fn dispatch(&self, message: Message, payload: Bytes, events: &PeerEvents) {
        trace!(peer = %self.id, command = %message.command(), "Received message");
        let peer = self.id;
        match message {
            Message::Addr(list) => {
                let addresses = list.into_iter().map(|a| a.address).collect();
                let _ = events.node.send(NodeEvent::Addresses { peer, addresses }).await;
            }
            Message::GetAddr => {
                let _ = events.node.send(NodeEvent::AddressRequest { peer }).await;
            }
            Message::Inv(inv) => match inv.inv_type {
                InventoryType::Block => {
                    if let Err(e) = self.get_data(InventoryType::Block, inv.hashes) {
                        debug!(peer = %peer, error = %e, "Could not request announced blocks");
                    }
                }
                InventoryType::Tx => {
                    let _ = events.node.send(NodeEvent::Inventory { peer, inv }).await;
                }
                InventoryType::Consensus => {}
            },
            Message::GetData(inv) => {
                let _ = events.node.send(NodeEvent::DataRequest { peer, inv }).await;
            }
            Message::Headers(headers) => {
                if let Some(top) = headers.iter().map(|h| h.index).max() {
                    self.update_height(top);
                }
                let _ = events.sync.send(SyncEvent::Headers { peer, headers }).await;
            }
            Message::Block(block) => {
                self.update_height(block.index());
                let _ = events
                    .sync
                    .send(SyncEvent::Block {
                        peer,
                        block,
                        raw: payload,
                    })
                    .await;
            }
            Message::Tx(tx) => {
                let _ = events.node.send(NodeEvent::Transaction { peer, tx }).await;
            }
            Message::Version(_) | Message::Verack => {
                debug!(peer = %peer, "Ignoring handshake message on active connection");
            }
            Message::GetHeaders(_) | Message::GetBlocks(_) => {
                trace!(peer = %peer, "Not serving chain data");
            }
            Message::Unknown { command, .. } => {
                trace!(peer = %peer, %command, "Ignoring unknown command");
            }
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .field("best_height", &self.best_height())
            .finish()
    }
}
