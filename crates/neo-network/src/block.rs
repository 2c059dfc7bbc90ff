//! Chain data carried by `headers`, `block` and `tx` messages.

use crate::serialize::{
    ensure, read_length, read_var_bytes, write_var_bytes, write_var_int, Serializable,
};
use crate::{Hash256, NetworkError, NetworkResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum transactions accepted in one block.
pub const MAX_TRANSACTIONS_PER_BLOCK: u64 = 0xFFFF;

/// Invocation/verification script pair attached to a header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Witness {
    pub invocation: Bytes,
    pub verification: Bytes,
}

impl Serializable for Witness {
    fn serialize(&self, buf: &mut BytesMut) {
        write_var_bytes(buf, &self.invocation);
        write_var_bytes(buf, &self.verification);
    }

    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self> {
        Ok(Self {
            invocation: read_var_bytes(buf)?,
            verification: read_var_bytes(buf)?,
        })
    }
}

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    /// Height of the block in the chain.
    pub index: u32,
    pub consensus_data: u64,
    pub next_consensus: [u8; 20],
    pub witness: Witness,
}

impl Header {
    fn serialize_unsigned(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.version);
        self.prev_hash.serialize(buf);
        self.merkle_root.serialize(buf);
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(self.index);
        buf.put_u64_le(self.consensus_data);
        buf.put_slice(&self.next_consensus);
    }

    /// Hash over the unsigned fields; the witness does not contribute.
    pub fn hash(&self) -> Hash256 {
        let mut buf = BytesMut::with_capacity(116);
        self.serialize_unsigned(&mut buf);
        Hash256::digest(&buf)
    }

    /// Build the header following `self`.
    pub fn child(&self, merkle_root: Hash256, timestamp: u32, consensus_data: u64) -> Header {
        Header {
            version: self.version,
            prev_hash: self.hash(),
            merkle_root,
            timestamp,
            index: self.index + 1,
            consensus_data,
            next_consensus: self.next_consensus,
            witness: Witness::default(),
        }
    }
}

impl Serializable for Header {
    fn serialize(&self, buf: &mut BytesMut) {
        self.serialize_unsigned(buf);
        buf.put_u8(1);
        self.witness.serialize(buf);
    }

    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self> {
        ensure(buf, 4 + 32 + 32 + 4 + 4 + 8 + 20 + 1, "header")?;
        let version = buf.get_u32_le();
        let prev_hash = Hash256::deserialize(buf)?;
        let merkle_root = Hash256::deserialize(buf)?;
        let timestamp = buf.get_u32_le();
        let index = buf.get_u32_le();
        let consensus_data = buf.get_u64_le();
        let mut next_consensus = [0u8; 20];
        buf.copy_to_slice(&mut next_consensus);
        let witness_marker = buf.get_u8();
        if witness_marker != 1 {
            return Err(NetworkError::InvalidMessage(format!(
                "header witness marker must be 1, got {witness_marker}"
            )));
        }
        let witness = Witness::deserialize(buf)?;
        Ok(Self {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            index,
            consensus_data,
            next_consensus,
            witness,
        })
    }
}

/// Opaque transaction blob. Verification belongs to the relay sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub data: Bytes,
}

impl Transaction {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn hash(&self) -> Hash256 {
        Hash256::digest(&self.data)
    }
}

impl Serializable for Transaction {
    fn serialize(&self, buf: &mut BytesMut) {
        write_var_bytes(buf, &self.data);
    }

    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self> {
        Ok(Self {
            data: read_var_bytes(buf)?,
        })
    }
}

/// Full block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }

    /// Merkle root over transaction hashes (pairwise `sha256d`, odd tail duplicated).
    pub fn compute_merkle_root(transactions: &[Transaction]) -> Hash256 {
        if transactions.is_empty() {
            return Hash256::ZERO;
        }
        let mut level: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    let mut joined = [0u8; 64];
                    joined[..32].copy_from_slice(&pair[0].0);
                    joined[32..].copy_from_slice(&right.0);
                    Hash256::digest(&joined)
                })
                .collect();
        }
        level[0]
    }
}

impl Serializable for Block {
    fn serialize(&self, buf: &mut BytesMut) {
        self.header.serialize(buf);
        write_var_int(buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.serialize(buf);
        }
    }

    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self> {
        let header = Header::deserialize(buf)?;
        let count = read_length(buf, MAX_TRANSACTIONS_PER_BLOCK)?;
        let mut transactions = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            transactions.push(Transaction::deserialize(buf)?);
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}
