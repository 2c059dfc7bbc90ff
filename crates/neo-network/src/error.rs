//! Network error types.

use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Remote nonce equals ours.
    #[error("Connected to self")]
    SelfConnection,

    /// Invalid message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Payload checksum does not match the header.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Payload length does not match the header.
    #[error("Length mismatch: header says {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Message too large.
    #[error("Message too large: {size} bytes, max {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Network magic mismatch.
    #[error("Network magic mismatch: expected {expected:#010x}, got {got:#010x}")]
    MagicMismatch { expected: u32, got: u32 },

    /// Peer not found.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Too many connections.
    #[error("Too many connections: {count}, max {max}")]
    TooManyConnections { count: usize, max: usize },

    /// Outbound queue of a peer is full or gone.
    #[error("Send queue unavailable for peer {0}")]
    SendQueue(String),

    /// Service lifecycle misuse (e.g. started twice).
    #[error("Service error: {0}")]
    Service(String),

    /// Timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Whether this error is a read/connect deadline rather than a hard failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetworkError::Timeout(_))
    }

    /// Whether the remote sent data that violates the protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            NetworkError::InvalidMessage(_)
                | NetworkError::ChecksumMismatch { .. }
                | NetworkError::LengthMismatch { .. }
                | NetworkError::MessageTooLarge { .. }
                | NetworkError::MagicMismatch { .. }
                | NetworkError::HandshakeFailed(_)
                | NetworkError::SelfConnection
        )
    }
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
