//! # neo-network
//!
//! P2P networking layer for the NEO blockchain.
//!
//! This crate provides:
//! - Wire framing and payload encoding
//! - TCP connections with the version/verack handshake
//! - Per-peer sessions with weighted selection
//! - The connection pool manager and transaction relay gate

mod codec;
mod connection;
pub mod discovery;
mod error;
mod hash;
mod manager;
mod message;
mod peer;
mod relay;
pub mod serialize;
mod weight;

pub mod block;

pub use block::{Block, Header, Transaction, Witness};
pub use codec::{decode_frame, encode_frame, MessageCodec, RawMessage, HEADER_SIZE};
pub use connection::{Connection, ConnectionConfig, ConnectionReader, ConnectionWriter};
pub use discovery::{parse_peer_address, SeedResolver};
pub use error::{NetworkError, NetworkResult};
pub use hash::{sha256d, Hash256};
pub use manager::{
    DialMode, FailureHistory, NodeManager, NodeManagerConfig, PoolStats, MAX_ERROR_COUNT,
    MAX_TIMEOUT_COUNT,
};
pub use message::{
    Command, GetBlocksPayload, InvPayload, InventoryType, Message, NetworkAddressWithTime,
    VersionPayload, MAX_ADDRESSES, MAX_HEADERS, MAX_INV_HASHES, NODE_NETWORK,
};
pub use peer::{
    DisconnectReason, NodeEvent, Peer, PeerEvents, PeerId, PeerInfo, PeerState, SyncEvent,
};
pub use relay::{RelayPool, RelayResult, RelaySink};
pub use weight::{PeerWeight, REQUEST_TIME_RECORD_COUNT, SPEED_RECORD_COUNT};

/// Default P2P port.
pub const DEFAULT_PORT: u16 = 10333;

/// Protocol magic for mainnet.
pub const MAINNET_MAGIC: u32 = 7_630_401;

/// Protocol magic for testnet.
pub const TESTNET_MAGIC: u32 = 1_953_787_457;

/// Maximum payload size of a single message.
pub const MAX_MESSAGE_SIZE: usize = 0x0200_0000; // 32 MiB

/// Protocol version advertised in `version`.
pub const PROTOCOL_VERSION: u32 = 0;
