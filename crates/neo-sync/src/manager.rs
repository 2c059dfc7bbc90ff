//! Sync orchestration.
//!
//! Every tick runs two independent lines: header sync keeps one `getheaders`
//! outstanding until the header tip is `header_look_ahead` past the stored
//! blocks, and block sync downloads the gap between the two in batches. Both
//! retry timed-out requests on another peer before issuing anything new.
//!
//! Downloaded blocks land in a height-ordered [`BlockCache`]; a single
//! persistence pass at a time moves them into the [`Ledger`] strictly in
//! height order.

use crate::cache::{BlockCache, CachedBlock};
use crate::ledger::Ledger;
use crate::request::{FlightInfo, RequestInfo};
use crate::{
    SyncError, SyncResult, BLOCK_CACHE_CAPACITY, BLOCK_REQUEST_LIMIT, HEADER_LOOK_AHEAD,
};
use bytes::Bytes;
use neo_network::{
    Block, Hash256, Header, InventoryType, NodeManager, PeerId, SyncEvent, MAX_INV_HASHES,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Capacity of the peer → sync event queue.
pub const SYNC_EVENT_QUEUE_SIZE: usize = 1024;

/// Ticks between progress log lines.
const PROGRESS_LOG_TICKS: u64 = 10;

/// Create the channel peers use to reach the sync manager.
pub fn sync_channel() -> (mpsc::Sender<SyncEvent>, mpsc::Receiver<SyncEvent>) {
    mpsc::channel(SYNC_EVENT_QUEUE_SIZE)
}

/// Sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub tick_interval: Duration,
    /// Max distance of the header tip ahead of the stored block height.
    pub header_look_ahead: u32,
    pub block_cache_capacity: usize,
    /// Max hashes in one `getdata`.
    pub block_request_limit: usize,
    pub header_timeout: Duration,
    pub block_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            header_look_ahead: HEADER_LOOK_AHEAD,
            block_cache_capacity: BLOCK_CACHE_CAPACITY,
            block_request_limit: BLOCK_REQUEST_LIMIT,
            header_timeout: Duration::from_secs(5),
            block_timeout: Duration::from_secs(5),
        }
    }
}

/// Snapshot of sync progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub header_height: u32,
    pub block_height: u32,
    pub cache_len: usize,
    pub cache_capacity: usize,
    pub header_request_outstanding: bool,
    pub block_requests_outstanding: usize,
    pub persisting: bool,
}

#[derive(Debug, Default)]
struct Requests {
    header: Option<RequestInfo>,
    /// Keyed by block hash.
    blocks: HashMap<Hash256, RequestInfo>,
}

/// Header-first synchronizer.
pub struct SyncManager {
    config: SyncConfig,
    ledger: Arc<dyn Ledger>,
    nodes: Arc<NodeManager>,
    /// Lock order: `requests` before `cache`.
    requests: Mutex<Requests>,
    cache: Mutex<BlockCache>,
    persisting: AtomicBool,
    event_rx: Mutex<Option<mpsc::Receiver<SyncEvent>>>,
    shutdown: CancellationToken,
}

impl SyncManager {
    pub fn new(
        config: SyncConfig,
        ledger: Arc<dyn Ledger>,
        nodes: Arc<NodeManager>,
        event_rx: mpsc::Receiver<SyncEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let cache = BlockCache::new(config.block_cache_capacity);
        Self {
            config,
            ledger,
            nodes,
            requests: Mutex::new(Requests::default()),
            cache: Mutex::new(cache),
            persisting: AtomicBool::new(false),
            event_rx: Mutex::new(Some(event_rx)),
            shutdown,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn status(&self) -> SyncStatus {
        let (header_request_outstanding, block_requests_outstanding) = {
            let requests = self.requests.lock();
            (requests.header.is_some(), requests.blocks.len())
        };
        let (cache_len, cache_capacity) = {
            let cache = self.cache.lock();
            (cache.len(), cache.capacity())
        };
        SyncStatus {
            header_height: self.ledger.cur_header_height(),
            block_height: self.ledger.cur_block_height(),
            cache_len,
            cache_capacity,
            header_request_outstanding,
            block_requests_outstanding,
            persisting: self.persisting.load(Ordering::Acquire),
        }
    }

    /// The outstanding header request, if any.
    pub fn header_request(&self) -> Option<RequestInfo> {
        self.requests.lock().header.clone()
    }

    pub fn block_request(&self, hash: &Hash256) -> Option<RequestInfo> {
        self.requests.lock().blocks.get(hash).cloned()
    }

    pub fn block_request_count(&self) -> usize {
        self.requests.lock().blocks.len()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// One scheduling round: retry what timed out, then issue new requests.
    pub fn tick(&self) {
        self.check_header_timeout();
        self.check_block_timeout();
        self.sync_header();
        self.sync_block();
    }

    /// Issue `getheaders` from the header tip unless one is outstanding or
    /// headers are already far enough ahead of the stored blocks.
    pub fn sync_header(&self) {
        let mut requests = self.requests.lock();
        if requests.header.is_some() {
            return;
        }

        let header_height = self.ledger.cur_header_height();
        let block_height = self.ledger.cur_block_height();
        if header_height.saturating_sub(block_height) >= self.config.header_look_ahead {
            trace!(header_height, block_height, "Header sync paused for blocks");
            return;
        }

        let height = header_height + 1;
        let Some(peer) = self.nodes.get_next_node(height) else {
            trace!(height, "No peer for headers");
            return;
        };

        let hash = self.ledger.header_hash_by_height(header_height);
        let mut request = RequestInfo::new(height);
        request.add_new_flight(FlightInfo::new(peer.id(), height));
        match peer.get_headers(hash) {
            Ok(()) => {
                debug!(peer = %peer.id(), height, "Requested headers");
                requests.header = Some(request);
            }
            Err(e) => debug!(peer = %peer.id(), error = %e, "Header request failed"),
        }
    }

    /// Request the next batch of blocks between the stored height and the
    /// header tip, bounded by cache room, the per-request limit and the
    /// `getdata` wire cap.
    pub fn sync_block(&self) {
        let mut requests = self.requests.lock();
        if !requests.blocks.is_empty() {
            return;
        }

        let header_height = self.ledger.cur_header_height();
        let block_height = self.ledger.cur_block_height();
        if header_height <= block_height {
            return;
        }

        let cache = self.cache.lock();
        let batch_limit = cache
            .remaining()
            .min(self.config.block_request_limit)
            .min(MAX_INV_HASHES as usize);
        if batch_limit == 0 {
            debug!(cached = cache.len(), "Block cache full, waiting for persistence");
            return;
        }

        let Some(peer) = self.nodes.get_next_node(block_height + 1) else {
            trace!(height = block_height + 1, "No peer for blocks");
            return;
        };
        let peer_height = peer.best_height();

        let mut hashes = Vec::with_capacity(batch_limit);
        let mut height = block_height + 1;
        while hashes.len() < batch_limit && height <= header_height {
            if height > peer_height {
                break;
            }
            if cache.contains(height) {
                height += 1;
                continue;
            }
            let hash = self.ledger.header_hash_by_height(height);
            if hash.is_zero() {
                break;
            }
            let mut request = RequestInfo::new(height);
            request.add_new_flight(FlightInfo::new(peer.id(), height));
            requests.blocks.insert(hash, request);
            hashes.push(hash);
            height += 1;
        }
        drop(cache);

        if hashes.is_empty() {
            return;
        }
        let count = hashes.len();
        match peer.get_data(InventoryType::Block, hashes.clone()) {
            Ok(()) => debug!(peer = %peer.id(), from = block_height + 1, count, "Requested blocks"),
            Err(e) => {
                debug!(peer = %peer.id(), error = %e, "Block request failed");
                for hash in &hashes {
                    requests.blocks.remove(hash);
                }
            }
        }
    }

    /// Retry the header request on another peer once its latest flight is
    /// older than `header_timeout`.
    pub fn check_header_timeout(&self) {
        let mut requests = self.requests.lock();
        let Some(request) = requests.header.as_mut() else {
            return;
        };
        let Some(flight) = request.most_recent_flight().copied() else {
            requests.header = None;
            return;
        };
        if !flight.is_timed_out(self.config.header_timeout) {
            return;
        }

        if self.ledger.cur_header_height() >= request.height {
            debug!(height = request.height, "Header request already satisfied");
            requests.header = None;
            return;
        }

        warn!(peer = %flight.peer, height = request.height, "Header request timed out");
        request.mark_failed_node(flight.peer);
        self.nodes.increase_peer_timeout_count(flight.peer);

        let Some(peer) = self
            .nodes
            .get_node_with_min_failed_time(&*request, request.height)
        else {
            debug!(height = request.height, "No peer to retry headers");
            requests.header = None;
            return;
        };

        let hash = self.ledger.header_hash_by_height(request.height - 1);
        request.add_new_flight(FlightInfo::new(peer.id(), request.height));
        match peer.get_headers(hash) {
            Ok(()) => debug!(peer = %peer.id(), height = request.height, "Retried headers"),
            Err(e) => {
                debug!(peer = %peer.id(), error = %e, "Header retry failed");
                requests.header = None;
            }
        }
    }

    /// Retry timed-out block requests as one batch on a fresh peer.
    ///
    /// Each offending peer takes one timeout per round, however many of its
    /// blocks were late.
    pub fn check_block_timeout(&self) {
        let mut requests = self.requests.lock();
        if requests.blocks.is_empty() {
            return;
        }

        let timeout = self.config.block_timeout;
        let timed_out: Vec<Hash256> = requests
            .blocks
            .iter()
            .filter(|(_, request)| {
                request
                    .most_recent_flight()
                    .map_or(true, |flight| flight.is_timed_out(timeout))
            })
            .map(|(hash, _)| *hash)
            .collect();
        if timed_out.is_empty() {
            return;
        }

        let block_height = self.ledger.cur_block_height();
        let mut offenders = HashSet::new();
        let mut retry = Vec::new();
        for hash in timed_out {
            let Some(request) = requests.blocks.get_mut(&hash) else {
                continue;
            };
            if request.height <= block_height {
                requests.blocks.remove(&hash);
                continue;
            }
            if let Some(flight) = request.most_recent_flight().copied() {
                request.mark_failed_node(flight.peer);
                offenders.insert(flight.peer);
            }
            retry.push((request.height, hash));
        }

        for peer in &offenders {
            warn!(peer = %peer, "Block request timed out");
            self.nodes.increase_peer_timeout_count(*peer);
        }
        if retry.is_empty() {
            return;
        }
        retry.sort_unstable_by_key(|(height, _)| *height);
        if retry.len() > MAX_INV_HASHES as usize {
            for (_, hash) in retry.split_off(MAX_INV_HASHES as usize) {
                requests.blocks.remove(&hash);
            }
        }

        let mut history: HashMap<PeerId, u32> = HashMap::new();
        for (_, hash) in &retry {
            if let Some(request) = requests.blocks.get(hash) {
                for (peer, count) in request.failed_nodes() {
                    *history.entry(*peer).or_insert(0) += count;
                }
            }
        }
        let max_height = retry.last().map_or(0, |(height, _)| *height);

        let Some(peer) = self.nodes.get_node_with_min_failed_time(&history, max_height) else {
            debug!(count = retry.len(), "No peer to retry blocks");
            for (_, hash) in &retry {
                requests.blocks.remove(hash);
            }
            return;
        };

        let mut hashes = Vec::with_capacity(retry.len());
        for (height, hash) in &retry {
            if let Some(request) = requests.blocks.get_mut(hash) {
                request.add_new_flight(FlightInfo::new(peer.id(), *height));
                hashes.push(*hash);
            }
        }
        let count = hashes.len();
        match peer.get_data(InventoryType::Block, hashes) {
            Ok(()) => debug!(peer = %peer.id(), count, "Retried blocks"),
            Err(e) => {
                debug!(peer = %peer.id(), error = %e, "Block retry failed");
                for (_, hash) in &retry {
                    requests.blocks.remove(hash);
                }
            }
        }
    }

    /// Apply a `headers` response. Responses that do not answer the
    /// outstanding request are dropped without touching any state.
    pub fn on_headers_received(&self, peer: PeerId, headers: &[Header]) {
        let mut requests = self.requests.lock();
        let Some(request) = requests.header.as_ref() else {
            trace!(peer = %peer, "Unsolicited headers");
            return;
        };
        let Some(first) = headers.first() else {
            return;
        };
        if first.index != request.height {
            trace!(peer = %peer, got = first.index, want = request.height, "Stale headers");
            return;
        }
        if first.index <= self.ledger.cur_header_height() {
            return;
        }

        let accepted = self.ledger.add_headers(headers);
        if accepted < headers.len() {
            warn!(peer = %peer, accepted, received = headers.len(), "Headers partially rejected");
            self.nodes.increase_peer_error_count(peer);
        }
        requests.header = None;
        debug!(
            peer = %peer,
            accepted,
            header_height = self.ledger.cur_header_height(),
            "Headers received"
        );
    }

    /// Accept a downloaded block into the cache.
    pub fn on_block_received(&self, peer: PeerId, block: Block, raw: Bytes) {
        let hash = block.hash();
        let mut requests = self.requests.lock();
        let Some(request) = requests.blocks.remove(&hash) else {
            trace!(peer = %peer, block = %hash, "Unsolicited block");
            return;
        };

        let flight = request.flight(peer).or_else(|| request.most_recent_flight());
        if let (Some(flight), Some(sender)) = (flight, self.nodes.peer(peer)) {
            let secs = flight.elapsed().as_secs_f64().max(0.001);
            sender.append_speed(raw.len() as f64 / secs);
        }

        let height = block.index();
        if height > self.ledger.cur_header_height() + 1 {
            return;
        }
        if height <= self.ledger.cur_block_height() {
            return;
        }

        let mut cache = self.cache.lock();
        if !cache.insert(CachedBlock { block, raw, peer }) {
            debug!(peer = %peer, height, cached = cache.len(), "Block not cached");
        }
    }

    /// Whether the cache holds something the persistence pass can act on.
    fn has_ready_block(&self) -> bool {
        let next = self.ledger.cur_block_height() + 1;
        self.cache
            .lock()
            .first_height()
            .is_some_and(|height| height <= next)
    }

    /// Move cached blocks into the ledger in height order.
    ///
    /// Returns 0 immediately when another pass is running.
    pub fn persist_ready_blocks(&self) -> usize {
        if self.persisting.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let persisted = self.drain_cache();
        self.persisting.store(false, Ordering::Release);
        persisted
    }

    fn drain_cache(&self) -> usize {
        let mut persisted = 0;
        loop {
            let next = self.ledger.cur_block_height() + 1;
            let entry = {
                let mut cache = self.cache.lock();
                let stale = cache.prune_through(next - 1);
                if stale > 0 {
                    debug!(stale, "Dropped superseded cached blocks");
                }
                cache.take(next)
            };
            let Some(entry) = entry else {
                break;
            };

            match self.ledger.add_block(&entry.raw) {
                Ok(block) => {
                    self.nodes.on_block_persisted(&block);
                    persisted += 1;
                }
                Err(e) => {
                    warn!(peer = %entry.peer, height = next, error = %e, "Ledger rejected block");
                    self.nodes.increase_peer_error_count(entry.peer);
                    break;
                }
            }
        }
        if persisted > 0 {
            debug!(persisted, height = self.ledger.cur_block_height(), "Blocks persisted");
        }
        persisted
    }

    /// Start a persistence pass on the blocking pool unless one is running
    /// or nothing is ready.
    pub fn spawn_persist(self: &Arc<Self>) {
        if self.persisting.load(Ordering::Acquire) || !self.has_ready_block() {
            return;
        }
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            this.persist_ready_blocks();
        });
    }

    /// Route one peer event.
    pub fn handle_event(self: &Arc<Self>, event: SyncEvent) {
        match event {
            SyncEvent::Headers { peer, headers } => self.on_headers_received(peer, &headers),
            SyncEvent::Block { peer, block, raw } => {
                self.on_block_received(peer, block, raw);
                self.spawn_persist();
            }
        }
    }

    /// Drive ticks and peer events until shutdown.
    pub async fn run(self: Arc<Self>) -> SyncResult<()> {
        let mut events = self
            .event_rx
            .lock()
            .take()
            .ok_or_else(|| SyncError::Internal("sync manager already running".into()))?;

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        info!(
            header_height = self.ledger.cur_header_height(),
            block_height = self.ledger.cur_block_height(),
            "Sync manager started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                    self.spawn_persist();
                    ticks += 1;
                    if ticks % PROGRESS_LOG_TICKS == 0 {
                        let status = self.status();
                        info!(
                            header_height = status.header_height,
                            block_height = status.block_height,
                            cached = status.cache_len,
                            in_flight = status.block_requests_outstanding,
                            peers = self.nodes.node_count(),
                            "Sync progress"
                        );
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }

        info!("Sync manager stopped");
        Ok(())
    }
}
