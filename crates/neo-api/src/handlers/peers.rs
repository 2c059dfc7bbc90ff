//! Peer handlers.

use super::authorize;
use crate::{ApiError, ApiResult, AppState};
use axum::{extract::State, http::HeaderMap, Json};
use neo_network::{parse_peer_address, PeerInfo, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Connect request.
#[derive(Deserialize)]
pub struct ConnectRequest {
    /// Peer address (`host[:port]`).
    pub address: String,
}

/// Connect response.
#[derive(Serialize)]
pub struct ConnectResponse {
    pub address: String,
    /// `queued`, or `ignored` when the address is local, connected or already queued.
    pub status: &'static str,
}

/// GET /peers/connected
pub async fn get_connected_peers(State(state): State<AppState>) -> ApiResult<Json<Vec<PeerInfo>>> {
    Ok(Json(state.nodes.connected_peers()))
}

/// GET /peers/known
///
/// Addresses learned but not connected.
pub async fn get_known_peers(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    let mut addrs = state.nodes.known_addresses();
    addrs.sort();
    Ok(Json(addrs.into_iter().map(|a| a.to_string()).collect()))
}

/// GET /peers/bad
pub async fn get_bad_peers(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    let mut addrs = state.nodes.bad_addresses();
    addrs.sort();
    Ok(Json(addrs.into_iter().map(|a| a.to_string()).collect()))
}

/// POST /peers/connect
///
/// Queue an address for the dialer.
pub async fn connect_peer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<Json<ConnectResponse>> {
    authorize(&state, &headers)?;

    let address = request.address.clone();
    let addr = tokio::task::spawn_blocking(move || parse_peer_address(&address, DEFAULT_PORT))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid address: {}", request.address)))?;

    let queued = state.nodes.connect_to(addr);
    if queued {
        info!(addr = %addr, "Peer queued via API");
    }
    Ok(Json(ConnectResponse {
        address: addr.to_string(),
        status: if queued { "queued" } else { "ignored" },
    }))
}
