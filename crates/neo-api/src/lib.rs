//! # neo-api
//!
//! Diagnostic HTTP interface for the NEO node.
//!
//! Endpoints:
//! - `/info` - Chain heights, sync and pool counters
//! - `/peers` - Connected peers and the address book
//! - `/transactions` - Relay submission and the relay pool

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;

use axum::Router;

/// Default API port.
pub const DEFAULT_API_PORT: u16 = 10332;

/// API version.
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the API router with all routes.
pub fn build_api(state: AppState) -> Router {
    create_router(state)
}
