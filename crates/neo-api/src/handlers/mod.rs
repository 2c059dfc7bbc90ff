//! API request handlers.

pub mod info;
pub mod peers;
pub mod transactions;

use crate::{ApiError, ApiResult, AppState};
use axum::http::HeaderMap;

/// Extract API key from request headers.
fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get("api_key").and_then(|v| v.to_str().ok())
}

/// Reject the request unless it carries the configured key.
fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    if state.check_api_key(extract_api_key(headers)) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}
