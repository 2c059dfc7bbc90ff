//! P2P protocol messages.
//!
//! Every frame carries an ASCII command; [`Message`] is the closed set of
//! commands this node understands, with [`Message::Unknown`] catching the rest.

use crate::block::{Block, Header, Transaction};
use crate::codec::RawMessage;
use crate::serialize::{
    ensure, read_list, read_var_string, write_list, write_var_string, Serializable,
};
use crate::{Hash256, NetworkError, NetworkResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// Maximum addresses in one `addr` message.
pub const MAX_ADDRESSES: u64 = 200;

/// Maximum hashes in one `inv`/`getdata` message.
pub const MAX_INV_HASHES: u64 = 500;

/// Maximum headers in one `headers` message.
pub const MAX_HEADERS: u64 = 2000;

/// Maximum locator hashes in `getheaders`/`getblocks`.
pub const MAX_LOCATOR_HASHES: u64 = 64;

/// Service bit advertised by full nodes.
pub const NODE_NETWORK: u64 = 1;

/// Wire commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Verack,
    Addr,
    GetAddr,
    Inv,
    GetData,
    GetHeaders,
    Headers,
    GetBlocks,
    Block,
    Tx,
    /// Any command this node does not interpret.
    Other(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Addr => "addr",
            Command::GetAddr => "getaddr",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::GetBlocks => "getblocks",
            Command::Block => "block",
            Command::Tx => "tx",
            Command::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "addr" => Command::Addr,
            "getaddr" => Command::GetAddr,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "getheaders" => Command::GetHeaders,
            "headers" => Command::Headers,
            "getblocks" => Command::GetBlocks,
            "block" => Command::Block,
            "tx" => Command::Tx,
            other => Command::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    pub version: u32,
    pub services: u64,
    pub timestamp: u32,
    /// Listening port of the sender (0 if not listening).
    pub port: u16,
    /// Random per-process value used for self-connection detection.
    pub nonce: u32,
    pub user_agent: String,
    /// Best block height of the sender.
    pub start_height: u32,
    pub relay: bool,
}

impl Serializable for VersionPayload {
    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.version);
        buf.put_u64_le(self.services);
        buf.put_u32_le(self.timestamp);
        buf.put_u16_le(self.port);
        buf.put_u32_le(self.nonce);
        write_var_string(buf, &self.user_agent);
        buf.put_u32_le(self.start_height);
        buf.put_u8(self.relay as u8);
    }

    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self> {
        ensure(buf, 4 + 8 + 4 + 2 + 4, "version")?;
        let version = buf.get_u32_le();
        let services = buf.get_u64_le();
        let timestamp = buf.get_u32_le();
        let port = buf.get_u16_le();
        let nonce = buf.get_u32_le();
        let user_agent = read_var_string(buf)?;
        ensure(buf, 5, "version")?;
        let start_height = buf.get_u32_le();
        let relay = buf.get_u8() != 0;
        Ok(Self {
            version,
            services,
            timestamp,
            port,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

/// Address entry of an `addr` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddressWithTime {
    pub timestamp: u32,
    pub services: u64,
    pub address: SocketAddr,
}

impl NetworkAddressWithTime {
    pub fn new(address: SocketAddr, timestamp: u32) -> Self {
        Self {
            timestamp,
            services: NODE_NETWORK,
            address,
        }
    }
}

impl Serializable for NetworkAddressWithTime {
    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.timestamp);
        buf.put_u64_le(self.services);
        let ip = match self.address.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        buf.put_slice(&ip.octets());
        buf.put_u16(self.address.port());
    }

    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self> {
        ensure(buf, 4 + 8 + 16 + 2, "network address")?;
        let timestamp = buf.get_u32_le();
        let services = buf.get_u64_le();
        let mut octets = [0u8; 16];
        buf.copy_to_slice(&mut octets);
        let port = buf.get_u16();
        let v6 = Ipv6Addr::from(octets);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        Ok(Self {
            timestamp,
            services,
            address: SocketAddr::new(ip, port),
        })
    }
}

/// Inventory item types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InventoryType {
    Tx = 0x01,
    Block = 0x02,
    Consensus = 0xe0,
}

impl TryFrom<u8> for InventoryType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(InventoryType::Tx),
            0x02 => Ok(InventoryType::Block),
            0xe0 => Ok(InventoryType::Consensus),
            _ => Err(NetworkError::InvalidMessage(format!(
                "Unknown inventory type: {value:#04x}"
            ))),
        }
    }
}

/// Payload of `inv` and `getdata`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvPayload {
    pub inv_type: InventoryType,
    pub hashes: Vec<Hash256>,
}

impl InvPayload {
    pub fn new(inv_type: InventoryType, hashes: Vec<Hash256>) -> Self {
        Self { inv_type, hashes }
    }
}

impl Serializable for InvPayload {
    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u8(self.inv_type as u8);
        write_list(buf, &self.hashes);
    }

    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self> {
        ensure(buf, 1, "inv")?;
        let inv_type = InventoryType::try_from(buf.get_u8())?;
        let hashes = read_list(buf, MAX_INV_HASHES)?;
        Ok(Self { inv_type, hashes })
    }
}

/// Payload of `getheaders` and `getblocks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlocksPayload {
    pub hash_start: Vec<Hash256>,
    /// Zero means "as many as allowed".
    pub hash_stop: Hash256,
}

impl GetBlocksPayload {
    pub fn from_hash(hash_start: Hash256) -> Self {
        Self {
            hash_start: vec![hash_start],
            hash_stop: Hash256::ZERO,
        }
    }
}

impl Serializable for GetBlocksPayload {
    fn serialize(&self, buf: &mut BytesMut) {
        write_list(buf, &self.hash_start);
        self.hash_stop.serialize(buf);
    }

    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self> {
        let hash_start = read_list(buf, MAX_LOCATOR_HASHES)?;
        let hash_stop = Hash256::deserialize(buf)?;
        Ok(Self {
            hash_start,
            hash_stop,
        })
    }
}

/// Header as it appears inside `headers`: the header followed by an empty
/// transaction count.
struct HeaderEntry(Header);

impl Serializable for HeaderEntry {
    fn serialize(&self, buf: &mut BytesMut) {
        self.0.serialize(buf);
        buf.put_u8(0);
    }

    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self> {
        let header = Header::deserialize(buf)?;
        ensure(buf, 1, "header entry")?;
        let tx_count = buf.get_u8();
        if tx_count != 0 {
            return Err(NetworkError::InvalidMessage(format!(
                "header entry must carry zero transactions, got {tx_count}"
            )));
        }
        Ok(Self(header))
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    Addr(Vec<NetworkAddressWithTime>),
    GetAddr,
    Inv(InvPayload),
    GetData(InvPayload),
    GetHeaders(GetBlocksPayload),
    Headers(Vec<Header>),
    GetBlocks(GetBlocksPayload),
    Block(Block),
    Tx(Transaction),
    /// Command not interpreted by this node; ignored on dispatch.
    Unknown { command: String, payload: Bytes },
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Version(_) => Command::Version,
            Message::Verack => Command::Verack,
            Message::Addr(_) => Command::Addr,
            Message::GetAddr => Command::GetAddr,
            Message::Inv(_) => Command::Inv,
            Message::GetData(_) => Command::GetData,
            Message::GetHeaders(_) => Command::GetHeaders,
            Message::Headers(_) => Command::Headers,
            Message::GetBlocks(_) => Command::GetBlocks,
            Message::Block(_) => Command::Block,
            Message::Tx(_) => Command::Tx,
            Message::Unknown { command, .. } => Command::Other(command.clone()),
        }
    }

    /// Serialize the payload (without frame header).
    pub fn payload(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Message::Version(v) => v.serialize(&mut buf),
            Message::Verack | Message::GetAddr => {}
            Message::Addr(list) => write_list(&mut buf, list),
            Message::Inv(inv) | Message::GetData(inv) => inv.serialize(&mut buf),
            Message::GetHeaders(p) | Message::GetBlocks(p) => p.serialize(&mut buf),
            Message::Headers(headers) => {
                let entries: Vec<HeaderEntry> = headers.iter().cloned().map(HeaderEntry).collect();
                write_list(&mut buf, &entries);
            }
            Message::Block(block) => block.serialize(&mut buf),
            Message::Tx(tx) => tx.serialize(&mut buf),
            Message::Unknown { payload, .. } => buf.put_slice(payload),
        }
        buf.freeze()
    }

    /// Wrap into a frame ready for the codec.
    pub fn to_raw(&self) -> RawMessage {
        RawMessage {
            command: self.command().as_str().to_string(),
            payload: self.payload(),
        }
    }

    /// Decode a frame's payload according to its command.
    pub fn decode(raw: &RawMessage) -> NetworkResult<Self> {
        fn parse<T: Serializable>(payload: &Bytes) -> NetworkResult<T> {
            T::from_bytes(payload)
        }
        fn empty(payload: &Bytes, what: &str) -> NetworkResult<()> {
            if payload.is_empty() {
                Ok(())
            } else {
                Err(NetworkError::InvalidMessage(format!(
                    "{what} must have an empty payload"
                )))
            }
        }

        let payload = &raw.payload;
        let message = match Command::parse(&raw.command) {
            Command::Version => Message::Version(parse(payload)?),
            Command::Verack => {
                empty(payload, "verack")?;
                Message::Verack
            }
            Command::GetAddr => {
                empty(payload, "getaddr")?;
                Message::GetAddr
            }
            Command::Addr => {
                let mut buf = payload.clone();
                let list = read_list(&mut buf, MAX_ADDRESSES)?;
                trailing(&buf)?;
                Message::Addr(list)
            }
            Command::Inv => Message::Inv(parse(payload)?),
            Command::GetData => Message::GetData(parse(payload)?),
            Command::GetHeaders => Message::GetHeaders(parse(payload)?),
            Command::GetBlocks => Message::GetBlocks(parse(payload)?),
            Command::Headers => {
                let mut buf = payload.clone();
                let entries: Vec<HeaderEntry> = read_list(&mut buf, MAX_HEADERS)?;
                trailing(&buf)?;
                Message::Headers(entries.into_iter().map(|e| e.0).collect())
            }
            Command::Block => Message::Block(parse(payload)?),
            Command::Tx => Message::Tx(parse(payload)?),
            Command::Other(command) => Message::Unknown {
                command,
                payload: payload.clone(),
            },
        };
        Ok(message)
    }
}

fn trailing(buf: &Bytes) -> NetworkResult<()> {
    if buf.has_remaining() {
        return Err(NetworkError::InvalidMessage(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }
    Ok(())
}
