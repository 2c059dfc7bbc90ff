//! Transaction handlers.

use super::authorize;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use neo_network::{Hash256, RelayResult, Transaction};
use serde::{Deserialize, Serialize};

/// Transaction submission request.
#[derive(Deserialize)]
pub struct SubmitTx {
    /// Serialized transaction, hex encoded.
    pub bytes: String,
}

/// A pooled transaction.
#[derive(Serialize)]
pub struct PooledTx {
    pub id: String,
    /// Serialized transaction, hex encoded.
    pub bytes: String,
}

/// Transaction response.
#[derive(Serialize)]
pub struct TxResponse {
    pub id: String,
    pub result: RelayResult,
}

/// POST /transactions
///
/// Run the relay gate. Duplicates are reported, not rejected.
pub async fn submit_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitTx>,
) -> ApiResult<Json<TxResponse>> {
    authorize(&state, &headers)?;

    let bytes = hex::decode(request.bytes.trim_start_matches("0x"))
        .map_err(|_| ApiError::BadRequest("Invalid transaction bytes".to_string()))?;
    let tx = Transaction::new(bytes);
    let id = tx.hash().to_string();

    match state.nodes.relay(tx) {
        RelayResult::Invalid => Err(ApiError::BadRequest(format!(
            "Transaction {} failed verification",
            id
        ))),
        RelayResult::LedgerNotReady => {
            Err(ApiError::Unavailable("Ledger not ready".to_string()))
        }
        result => Ok(Json(TxResponse { id, result })),
    }
}

/// GET /transactions/unconfirmed
///
/// Hashes in the relay pool.
pub async fn get_unconfirmed(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    let mut ids: Vec<String> = state
        .nodes
        .relay_pool()
        .snapshot()
        .iter()
        .map(|tx| tx.hash().to_string())
        .collect();
    ids.sort();
    Ok(Json(ids))
}

/// GET /transactions/unconfirmed/:id
pub async fn get_unconfirmed_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PooledTx>> {
    let hash = Hash256::from_hex(&id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let tx = state
        .nodes
        .relay_pool()
        .get(&hash)
        .ok_or_else(|| ApiError::NotFound(format!("Transaction {} not in pool", id)))?;
    Ok(Json(PooledTx {
        id: hash.to_string(),
        bytes: hex::encode(&tx.data),
    }))
}
