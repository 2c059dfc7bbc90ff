//! Binary serialization primitives shared by all payloads.
//!
//! Integers are little-endian. Variable-length integers use the minimal
//! encoding: values below `0xFD` take a single byte, larger values are
//! prefixed with `0xFD`/`0xFE`/`0xFF` followed by a 2/4/8-byte value.
//! Byte strings and strings carry a var-int length prefix.

use crate::{NetworkError, NetworkResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Upper bound accepted for any var-int length prefix.
pub const MAX_VAR_LENGTH: u64 = 0x0200_0000;

/// Types with a canonical wire representation.
pub trait Serializable: Sized {
    /// Append the wire form to `buf`.
    fn serialize(&self, buf: &mut BytesMut);

    /// Read one value from the front of `buf`.
    fn deserialize(buf: &mut Bytes) -> NetworkResult<Self>;

    /// Serialize into a fresh buffer.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf);
        buf.freeze()
    }

    /// Deserialize from a complete buffer, rejecting trailing bytes.
    fn from_bytes(bytes: &[u8]) -> NetworkResult<Self> {
        let mut buf = Bytes::copy_from_slice(bytes);
        let value = Self::deserialize(&mut buf)?;
        if buf.has_remaining() {
            return Err(NetworkError::InvalidMessage(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }
        Ok(value)
    }
}

/// Fail unless `buf` still holds `n` bytes.
pub fn ensure(buf: &Bytes, n: usize, what: &str) -> NetworkResult<()> {
    if buf.remaining() < n {
        return Err(NetworkError::InvalidMessage(format!(
            "{what} truncated: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Number of bytes `write_var_int` produces for `value`.
pub fn var_int_len(value: u64) -> usize {
    match value {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

pub fn write_var_int(buf: &mut BytesMut, value: u64) {
    match value {
        0..=0xFC => buf.put_u8(value as u8),
        0xFD..=0xFFFF => {
            buf.put_u8(0xFD);
            buf.put_u16_le(value as u16);
        }
        0x1_0000..=0xFFFF_FFFF => {
            buf.put_u8(0xFE);
            buf.put_u32_le(value as u32);
        }
        _ => {
            buf.put_u8(0xFF);
            buf.put_u64_le(value);
        }
    }
}

pub fn read_var_int(buf: &mut Bytes) -> NetworkResult<u64> {
    ensure(buf, 1, "var-int")?;
    let marker = buf.get_u8();
    let value = match marker {
        0xFD => {
            ensure(buf, 2, "var-int")?;
            buf.get_u16_le() as u64
        }
        0xFE => {
            ensure(buf, 4, "var-int")?;
            buf.get_u32_le() as u64
        }
        0xFF => {
            ensure(buf, 8, "var-int")?;
            buf.get_u64_le()
        }
        b => b as u64,
    };
    Ok(value)
}

/// Read a var-int used as a length or count, bounded by `max`.
pub fn read_length(buf: &mut Bytes, max: u64) -> NetworkResult<usize> {
    let len = read_var_int(buf)?;
    if len > max {
        return Err(NetworkError::InvalidMessage(format!(
            "length {len} exceeds limit {max}"
        )));
    }
    Ok(len as usize)
}

pub fn write_var_bytes(buf: &mut BytesMut, data: &[u8]) {
    write_var_int(buf, data.len() as u64);
    buf.put_slice(data);
}

pub fn read_var_bytes(buf: &mut Bytes) -> NetworkResult<Bytes> {
    let len = read_length(buf, MAX_VAR_LENGTH)?;
    ensure(buf, len, "var-bytes")?;
    Ok(buf.split_to(len))
}

pub fn write_var_string(buf: &mut BytesMut, s: &str) {
    write_var_bytes(buf, s.as_bytes());
}

pub fn read_var_string(buf: &mut Bytes) -> NetworkResult<String> {
    let raw = read_var_bytes(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| NetworkError::InvalidMessage(format!("invalid utf-8 string: {e}")))
}

/// Serialize a var-int counted list.
pub fn write_list<T: Serializable>(buf: &mut BytesMut, items: &[T]) {
    write_var_int(buf, items.len() as u64);
    for item in items {
        item.serialize(buf);
    }
}

/// Deserialize a var-int counted list of at most `max` items.
pub fn read_list<T: Serializable>(buf: &mut Bytes, max: u64) -> NetworkResult<Vec<T>> {
    let count = read_length(buf, max)?;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(T::deserialize(buf)?);
    }
    Ok(items)
}
