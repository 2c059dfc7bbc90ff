//! 256-bit hashes.

use crate::serialize::{ensure, Serializable};
use crate::{NetworkError, NetworkResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use std::fmt;

/// Double SHA-256.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// A 32-byte hash identifying headers, blocks and transactions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero hash, returned for unknown heights.
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Hash arbitrary bytes with double SHA-256.
    pub fn digest(data: &[u8]) -> Self {
        Self(sha256d(data))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> NetworkResult<Self> {
        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| NetworkError::InvalidMessage(format!("invalid hash hex: {e}")))?;
        if raw.len() != 32 {
            return Err(NetworkError::InvalidMessage(format!(
                "hash must be 32 bytes, got {}",
                raw.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&raw);
        Ok(Self(out))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

impl Serializable for Hash256 {
    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self> {
        ensure(buf, 32, "hash")?;
        let mut out = [0u8; 32];
        buf.copy_to_slice(&mut out);
        Ok(Self(out))
    }
}
