//! P2P protocol codec for message framing.
//!
//! Every message uses the following frame:
//!
//! ```text
//! +----------+--------------+----------+----------+
//! |  Magic   |   Command    |  Length  | Checksum |
//! | 4 bytes  |  12 bytes    | 4 bytes  | 4 bytes  |
//! +----------+--------------+----------+----------+
//! |                    Payload                    |
//! |                 (Length bytes)                |
//! +-----------------------------------------------+
//! ```
//!
//! - Magic: network identifier, little-endian u32
//! - Command: ASCII, zero padded to 12 bytes
//! - Length: payload length, little-endian u32
//! - Checksum: first 4 bytes of SHA256(SHA256(payload))

use crate::hash::sha256d;
use crate::{NetworkError, NetworkResult, MAINNET_MAGIC, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Header size: magic (4) + command (12) + length (4) + checksum (4) = 24 bytes
pub const HEADER_SIZE: usize = 24;

/// Width of the command field.
pub const COMMAND_SIZE: usize = 12;

/// One frame: command plus undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub command: String,
    pub payload: Bytes,
}

/// Message codec for the P2P protocol.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    /// Network magic.
    magic: u32,
    /// Maximum allowed payload size.
    max_size: usize,
}

impl MessageCodec {
    /// Create a new codec with mainnet magic.
    pub fn new() -> Self {
        Self::with_magic(MAINNET_MAGIC)
    }

    /// Create a codec with custom magic.
    pub fn with_magic(magic: u32) -> Self {
        Self {
            magic,
            max_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// First 4 bytes of the double SHA-256 of the payload.
    pub fn checksum(payload: &[u8]) -> [u8; 4] {
        let hash = sha256d(payload);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&hash[0..4]);
        checksum
    }

    fn verify_checksum(payload: &[u8], expected: [u8; 4]) -> NetworkResult<()> {
        let actual = Self::checksum(payload);
        if actual != expected {
            return Err(NetworkError::ChecksumMismatch {
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }

    fn parse_command(field: &[u8]) -> NetworkResult<String> {
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        if field[end..].iter().any(|&b| b != 0) {
            return Err(NetworkError::InvalidMessage(
                "Command field is not zero padded".to_string(),
            ));
        }
        let name = &field[..end];
        if name.is_empty() || !name.iter().all(|b| b.is_ascii_graphic()) {
            return Err(NetworkError::InvalidMessage(format!(
                "Invalid command bytes: {}",
                hex::encode(field)
            )));
        }
        Ok(String::from_utf8_lossy(name).into_owned())
    }

    fn write_frame(&self, command: &str, payload: &[u8], dst: &mut BytesMut) -> NetworkResult<()> {
        if payload.len() > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: payload.len(),
                max: self.max_size,
            });
        }

        let mut field = [0u8; COMMAND_SIZE];
        let name = command.as_bytes();
        let n = name.len().min(COMMAND_SIZE);
        field[..n].copy_from_slice(&name[..n]);

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u32_le(self.magic);
        dst.put_slice(&field);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&Self::checksum(payload));
        dst.put_slice(payload);
        Ok(())
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = RawMessage;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least header size
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if magic != self.magic {
            return Err(NetworkError::MagicMismatch {
                expected: self.magic,
                got: magic,
            });
        }

        let command = Self::parse_command(&src[4..16])?;
        let length = u32::from_le_bytes([src[16], src[17], src[18], src[19]]) as usize;
        let checksum = [src[20], src[21], src[22], src[23]];

        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        let total_size = HEADER_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();
        Self::verify_checksum(&payload, checksum)?;

        Ok(Some(RawMessage { command, payload }))
    }
}

impl Encoder<RawMessage> for MessageCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: RawMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.write_frame(&item.command, &item.payload, dst)
    }
}

/// Encode a single complete frame.
pub fn encode_frame(magic: u32, command: &str, payload: &[u8]) -> NetworkResult<Bytes> {
    let mut dst = BytesMut::new();
    MessageCodec::with_magic(magic).write_frame(command, payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode exactly one complete frame into `(magic, command, payload)`.
///
/// Unlike the streaming decoder, the buffer must contain precisely one frame:
/// a payload shorter or longer than the declared length is a
/// [`NetworkError::LengthMismatch`].
pub fn decode_frame(bytes: &[u8]) -> NetworkResult<(u32, String, Bytes)> {
    if bytes.len() < HEADER_SIZE {
        return Err(NetworkError::LengthMismatch {
            declared: HEADER_SIZE,
            actual: bytes.len(),
        });
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let command = MessageCodec::parse_command(&bytes[4..16])?;
    let length = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]) as usize;
    let checksum = [bytes[20], bytes[21], bytes[22], bytes[23]];
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != length {
        return Err(NetworkError::LengthMismatch {
            declared: length,
            actual: payload.len(),
        });
    }
    MessageCodec::verify_checksum(payload, checksum)?;
    Ok((magic, command, Bytes::copy_from_slice(payload)))
}
