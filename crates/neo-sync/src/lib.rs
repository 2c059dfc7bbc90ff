//! # neo-sync
//!
//! Block synchronization for the NEO blockchain.
//!
//! This crate provides:
//! - Header-first synchronization with a bounded look-ahead
//! - Batched block download with per-request retry on other peers
//! - A height-ordered block cache drained by a single persistence pass
//! - The `Ledger` contract and an in-memory implementation

mod cache;
mod error;
mod ledger;
mod manager;
mod request;

pub use cache::{BlockCache, CachedBlock};
pub use error::{LedgerError, LedgerResult, SyncError, SyncResult};
pub use ledger::{genesis_block, Ledger, MemoryLedger};
pub use manager::{sync_channel, SyncConfig, SyncManager, SyncStatus, SYNC_EVENT_QUEUE_SIZE};
pub use request::{FlightInfo, RequestInfo};

/// Max distance of the header tip ahead of the stored blocks.
pub const HEADER_LOOK_AHEAD: u32 = 2000;

/// Blocks held in memory awaiting persistence.
pub const BLOCK_CACHE_CAPACITY: usize = 500;

/// Max block hashes in one `getdata`.
pub const BLOCK_REQUEST_LIMIT: usize = 500;
