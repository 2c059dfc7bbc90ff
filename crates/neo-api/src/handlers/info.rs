//! Node info handler.

use crate::{ApiResult, AppState, API_VERSION};
use axum::{extract::State, Json};
use serde::Serialize;

/// Node info response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    pub app_version: String,
    /// Height of the header tip.
    pub headers_height: u32,
    /// Height of the last stored block.
    pub full_height: u32,
    pub peer_count: usize,
    pub queued_count: usize,
    pub known_count: usize,
    pub bad_count: usize,
    pub cached_blocks: usize,
    pub cache_capacity: usize,
    pub header_request_outstanding: bool,
    pub block_requests_outstanding: usize,
    pub unconfirmed_count: usize,
    /// Stored blocks reach the best height any connected peer advertises.
    pub is_synced: bool,
}

/// GET /info
pub async fn get_info(State(state): State<AppState>) -> ApiResult<Json<NodeInfo>> {
    let sync = state.sync.status();
    let pool = state.nodes.stats();
    let best_peer_height = state
        .nodes
        .connected_peers()
        .iter()
        .map(|peer| peer.best_height)
        .max();

    let is_synced = best_peer_height.is_some_and(|best| sync.block_height >= best);

    Ok(Json(NodeInfo {
        name: state.node_name.clone(),
        app_version: API_VERSION.to_string(),
        headers_height: sync.header_height,
        full_height: sync.block_height,
        peer_count: pool.connected,
        queued_count: pool.queued,
        known_count: pool.known,
        bad_count: pool.bad,
        cached_blocks: sync.cache_len,
        cache_capacity: sync.cache_capacity,
        header_request_outstanding: sync.header_request_outstanding,
        block_requests_outstanding: sync.block_requests_outstanding,
        unconfirmed_count: pool.relay_pool,
        is_synced,
    }))
}
