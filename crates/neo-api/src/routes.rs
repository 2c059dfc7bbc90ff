//! API route definitions.

use crate::{handlers, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Info endpoints
        .route("/info", get(handlers::info::get_info))
        // Peer endpoints
        .route(
            "/peers/connected",
            get(handlers::peers::get_connected_peers),
        )
        .route("/peers/known", get(handlers::peers::get_known_peers))
        .route("/peers/bad", get(handlers::peers::get_bad_peers))
        .route("/peers/connect", post(handlers::peers::connect_peer))
        // Transaction endpoints
        .route(
            "/transactions",
            post(handlers::transactions::submit_transaction),
        )
        .route(
            "/transactions/unconfirmed",
            get(handlers::transactions::get_unconfirmed),
        )
        .route(
            "/transactions/unconfirmed/:id",
            get(handlers::transactions::get_unconfirmed_by_id),
        )
        // Apply middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
