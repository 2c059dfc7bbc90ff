//! API route tests.
//!
//! These tests verify API endpoint behavior including:
//! - Response shapes for the info and peer views
//! - Relay submission and its error mapping
//! - API key enforcement on mutating endpoints

use crate::generators::{test_addr, test_tx};
use crate::harness::SyncHarness;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use neo_api::AppState;
use neo_sync::SyncConfig;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Create a test API router over a fresh harness.
fn create_test_api() -> (Router, SyncHarness) {
    let h = SyncHarness::new(SyncConfig::default(), 10);
    let state = AppState::new(h.nodes.clone(), h.sync.clone(), "test-node".to_string());
    (neo_api::build_api(state), h)
}

/// Create a test API router with API key authentication.
fn create_test_api_with_auth(api_key: &str) -> (Router, SyncHarness) {
    let h = SyncHarness::new(SyncConfig::default(), 10);
    let state = AppState::new(h.nodes.clone(), h.sync.clone(), "test-node".to_string())
        .with_api_key(api_key.to_string());
    (neo_api::build_api(state), h)
}

/// Helper to make a GET request and get response body as JSON.
async fn get_json(router: &Router, path: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    (status, json)
}

/// Helper to make a POST request with JSON body.
async fn post_json(
    router: &Router,
    path: &str,
    body: Value,
    api_key: Option<&str>,
) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json");
    if let Some(key) = api_key {
        request = request.header("api_key", key);
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    (status, json)
}

// ============================================================================
// Info
// ============================================================================

#[tokio::test]
async fn test_info_reports_heights_and_pool() {
    let (router, mut h) = create_test_api();
    h.store_headers(10);
    h.store_blocks(4);
    let _peer = h.connect(10);

    let (status, json) = get_json(&router, "/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "test-node");
    assert_eq!(json["appVersion"], neo_api::API_VERSION);
    assert_eq!(json["headersHeight"], 10);
    assert_eq!(json["fullHeight"], 4);
    assert_eq!(json["peerCount"], 1);
    assert_eq!(json["cacheCapacity"], 500);
    assert_eq!(json["headerRequestOutstanding"], false);
    assert_eq!(json["isSynced"], false);
}

#[tokio::test]
async fn test_info_synced_once_blocks_reach_peers() {
    let (router, mut h) = create_test_api();
    h.store_headers(10);
    h.store_blocks(10);
    let _peer = h.connect(10);

    let (_, json) = get_json(&router, "/info").await;
    assert_eq!(json["isSynced"], true);
}

#[tokio::test]
async fn test_info_not_synced_without_peers() {
    let (router, _h) = create_test_api();
    let (_, json) = get_json(&router, "/info").await;
    assert_eq!(json["peerCount"], 0);
    assert_eq!(json["isSynced"], false);
}

// ============================================================================
// Peers
// ============================================================================

#[tokio::test]
async fn test_connected_peers_listed() {
    let (router, mut h) = create_test_api();
    let peer = h.connect(7);

    let (status, json) = get_json(&router, "/peers/connected").await;
    assert_eq!(status, StatusCode::OK);
    let peers = json.as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["addr"], peer.peer.addr().to_string());
    assert_eq!(peers[0]["best_height"], 7);
}

#[tokio::test]
async fn test_known_and_bad_peers_listed() {
    let (router, mut h) = create_test_api();
    let peer = h.connect(7);
    h.nodes.replace_node(peer.id());

    let (status, bad) = get_json(&router, "/peers/bad").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bad, json!([peer.peer.addr().to_string()]));

    let (status, known) = get_json(&router, "/peers/known").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(known, json!([]));
}

#[tokio::test]
async fn test_connect_peer_queues_address() {
    let (router, h) = create_test_api();
    let body = json!({ "address": "10.9.9.9:20333" });

    let (status, json) = post_json(&router, "/peers/connect", body.clone(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "queued");
    assert_eq!(json["address"], "10.9.9.9:20333");
    assert_eq!(h.nodes.queued_addresses().len(), 1);

    let (_, json) = post_json(&router, "/peers/connect", body, None).await;
    assert_eq!(json["status"], "ignored");
}

#[tokio::test]
async fn test_connect_peer_defaults_port() {
    let (router, _h) = create_test_api();
    let (status, json) =
        post_json(&router, "/peers/connect", json!({ "address": "10.9.9.8" }), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["address"],
        format!("10.9.9.8:{}", neo_network::DEFAULT_PORT)
    );
}

#[tokio::test]
async fn test_connect_peer_rejects_garbage() {
    let (router, _h) = create_test_api();
    let (status, json) = post_json(
        &router,
        "/peers/connect",
        json!({ "address": "not an address::" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], 400);
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn test_submit_transaction_accepted_then_duplicate() {
    let (router, _h) = create_test_api();
    let tx = test_tx(42);
    let body = json!({ "bytes": hex::encode(&tx.data) });

    let (status, json) = post_json(&router, "/transactions", body.clone(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], tx.hash().to_string());
    assert_eq!(json["result"], "accepted");

    let (status, json) = post_json(&router, "/transactions", body, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "already_pooled");

    let (_, pool) = get_json(&router, "/transactions/unconfirmed").await;
    assert_eq!(pool, json!([tx.hash().to_string()]));
}

#[tokio::test]
async fn test_submit_invalid_hex() {
    let (router, _h) = create_test_api();
    let (status, json) =
        post_json(&router, "/transactions", json!({ "bytes": "zz" }), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["reason"], "Bad Request");
}

#[tokio::test]
async fn test_submit_empty_transaction_fails_verification() {
    let (router, _h) = create_test_api();
    let (status, _) = post_json(&router, "/transactions", json!({ "bytes": "" }), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unconfirmed_lookup() {
    let (router, h) = create_test_api();
    let tx = test_tx(7);
    h.nodes.relay(tx.clone());

    let path = format!("/transactions/unconfirmed/{}", tx.hash());
    let (status, json) = get_json(&router, &path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["bytes"], hex::encode(&tx.data));

    let missing = format!("/transactions/unconfirmed/{}", test_tx(8).hash());
    let (status, json) = get_json(&router, &missing).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], 404);

    let (status, _) = get_json(&router, "/transactions/unconfirmed/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// API key
// ============================================================================

#[tokio::test]
async fn test_api_key_required_for_mutations() {
    let (router, h) = create_test_api_with_auth("secret");
    let body = json!({ "bytes": hex::encode(&test_tx(1).data) });

    let (status, json) = post_json(&router, "/transactions", body.clone(), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["detail"], "API key required");

    let (status, _) = post_json(&router, "/transactions", body.clone(), Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post_json(&router, "/transactions", body, Some("secret")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_json(
        &router,
        "/peers/connect",
        json!({ "address": test_addr(3).to_string() }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(h.nodes.queued_addresses().is_empty());
}

#[tokio::test]
async fn test_reads_need_no_api_key() {
    let (router, _h) = create_test_api_with_auth("secret");
    let (status, _) = get_json(&router, "/info").await;
    assert_eq!(status, StatusCode::OK);
}
