//! Shared application state.

use neo_network::NodeManager;
use neo_sync::SyncManager;
use std::sync::Arc;

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection pool.
    pub nodes: Arc<NodeManager>,
    /// Synchronizer.
    pub sync: Arc<SyncManager>,
    /// Node name.
    pub node_name: String,
    /// API key required by mutating endpoints (if set).
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(nodes: Arc<NodeManager>, sync: Arc<SyncManager>, node_name: String) -> Self {
        Self {
            nodes,
            sync,
            node_name,
            api_key: None,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: String) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Check if API key is valid.
    pub fn check_api_key(&self, provided: Option<&str>) -> bool {
        match (&self.api_key, provided) {
            (None, _) => true,
            (Some(expected), Some(provided)) => expected == provided,
            (Some(_), None) => false,
        }
    }
}
