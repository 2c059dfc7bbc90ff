//! Node implementation.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use neo_api::AppState;
use neo_network::NodeManager;
use neo_sync::{sync_channel, MemoryLedger, SyncManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The main node struct coordinating all components.
pub struct Node {
    config: NodeConfig,
    nodes: Arc<NodeManager>,
    sync: Arc<SyncManager>,
    /// Root of every component's cancellation.
    shutdown: CancellationToken,
}

impl Node {
    /// Wire the ledger, the connection pool and the synchronizer.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let ledger = Arc::new(MemoryLedger::default());
        let (sync_tx, sync_rx) = sync_channel();

        let nodes = Arc::new(NodeManager::new(
            config.node_manager_config()?,
            ledger.clone(),
            sync_tx,
            shutdown.child_token(),
        ));
        let sync = Arc::new(SyncManager::new(
            config.sync_config()?,
            ledger,
            Arc::clone(&nodes),
            sync_rx,
            shutdown.child_token(),
        ));

        Ok(Self {
            config,
            nodes,
            sync,
            shutdown,
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run every service until shutdown. A service failing stops the rest.
    pub async fn run(&self) -> Result<()> {
        info!("Starting node services...");
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        if self.config.api.enabled {
            self.start_api(&mut tasks).await?;
        }

        let nodes = Arc::clone(&self.nodes);
        tasks.spawn(async move { nodes.run().await.context("node manager failed") });

        let sync = Arc::clone(&self.sync);
        tasks.spawn(async move { sync.run().await.context("sync manager failed") });

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .context("service task panicked")
                .and_then(|service| service);
            if let Err(e) = outcome {
                error!("Service error: {:#}", e);
                self.shutdown.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        let status = self.sync.status();
        info!(
            header_height = status.header_height,
            block_height = status.block_height,
            "Node services stopped"
        );
        result
    }

    /// Start the API server.
    async fn start_api(&self, tasks: &mut JoinSet<Result<()>>) -> Result<()> {
        let bind_addr: SocketAddr = self
            .config
            .api
            .bind_address
            .parse()
            .with_context(|| format!("Invalid API bind address {}", self.config.api.bind_address))?;

        let app_state = AppState::new(
            Arc::clone(&self.nodes),
            Arc::clone(&self.sync),
            self.config.node_name.clone(),
        );
        let app_state = if let Some(ref key) = self.config.api.api_key {
            app_state.with_api_key(key.clone())
        } else {
            app_state
        };

        let router = neo_api::build_api(app_state);

        info!("Starting API server on {}", bind_addr);
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind API on {}", bind_addr))?;

        let shutdown = self.shutdown.clone();
        tasks.spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .context("API server failed")
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_config() -> NodeConfig {
        let mut config = NodeConfig::default_for_network("mainnet");
        config.network.bind_address = "127.0.0.1:0".to_string();
        config.network.seed_list.clear();
        config.api.bind_address = "127.0.0.1:0".to_string();
        config
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let node = Node::new(local_config()).unwrap();
        let shutdown = node.shutdown_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), node.run())
            .await
            .expect("node did not stop")
            .unwrap();
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        let mut config = local_config();
        config.network.bind_address = "not-an-address".to_string();
        assert!(Node::new(config).is_err());
    }
}
