//! Sync error types.

use neo_network::{Hash256, NetworkError};
use thiserror::Error;

/// Sync errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Ledger rejected data.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Lifecycle misuse, e.g. running the manager twice.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Ledger rejections.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Bytes do not decode as a block.
    #[error("Malformed block: {0}")]
    Decode(#[from] NetworkError),

    /// Block does not extend the stored chain.
    #[error("Block {got} does not follow stored height {current}")]
    OutOfOrder { current: u32, got: u32 },

    /// No header is stored for the block's height yet.
    #[error("No header at height {0}")]
    UnknownHeader(u32),

    /// Block hash differs from the stored header hash.
    #[error("Hash mismatch at height {height}: expected {expected}, got {got}")]
    HashMismatch {
        height: u32,
        expected: Hash256,
        got: Hash256,
    },

    /// Transactions do not match the header's merkle root.
    #[error("Merkle root mismatch at height {0}")]
    MerkleMismatch(u32),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for ledger writes.
pub type LedgerResult<T> = Result<T, LedgerError>;
