//! Node configuration.

use crate::Args;
use anyhow::{bail, Context, Result};
use neo_network::discovery::MAINNET_SEEDS;
use neo_network::{
    ConnectionConfig, NodeManagerConfig, MAINNET_MAGIC, MAX_INV_HASHES, TESTNET_MAGIC,
};
use neo_sync::{SyncConfig, BLOCK_CACHE_CAPACITY, BLOCK_REQUEST_LIMIT, HEADER_LOOK_AHEAD};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name.
    pub node_name: String,
    /// Chain (mainnet, testnet).
    pub chain: String,
    /// P2P configuration.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Synchronization configuration.
    #[serde(default)]
    pub sync: SyncSection,
    /// API configuration.
    #[serde(default)]
    pub api: ApiConfig,
}

/// P2P configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// P2P bind address.
    pub bind_address: String,
    /// Accept inbound connections.
    pub listen: bool,
    /// Overrides the chain's magic.
    pub magic: Option<u32>,
    /// Seed `host:port` entries.
    pub seed_list: Vec<String>,
    pub min_clients: usize,
    pub max_clients: usize,
    pub dial_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub peer_query_interval_secs: u64,
    pub pool_check_interval_secs: u64,
    pub max_concurrent_dials: usize,
    pub user_agent: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:10333".to_string(),
            listen: true,
            magic: None,
            seed_list: MAINNET_SEEDS.iter().map(|s| s.to_string()).collect(),
            min_clients: 4,
            max_clients: 10,
            dial_timeout_secs: 3,
            handshake_timeout_secs: 10,
            read_timeout_secs: 90,
            peer_query_interval_secs: 15,
            pool_check_interval_secs: 10,
            max_concurrent_dials: 5,
            user_agent: None,
        }
    }
}

/// Synchronization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub tick_interval_ms: u64,
    pub header_look_ahead: u32,
    pub block_cache_capacity: usize,
    pub block_request_limit: usize,
    pub header_timeout_secs: u64,
    pub block_timeout_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            header_look_ahead: HEADER_LOOK_AHEAD,
            block_cache_capacity: BLOCK_CACHE_CAPACITY,
            block_request_limit: BLOCK_REQUEST_LIMIT,
            header_timeout_secs: 5,
            block_timeout_secs: 5,
        }
    }
}

/// API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Serve the diagnostic API.
    pub enabled: bool,
    /// API bind address.
    pub bind_address: String,
    /// API key (optional).
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:10332".to_string(),
            api_key: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(&args.network)
        };

        // Override with CLI args
        config.chain = args.network.clone();
        if let Some(ref p2p_bind) = args.p2p_bind {
            config.network.bind_address = p2p_bind.clone();
        }
        if let Some(ref api_bind) = args.api_bind {
            config.api.bind_address = api_bind.clone();
        }
        if !args.seed.is_empty() {
            config.network.seed_list = args.seed.clone();
        }
        if args.no_api {
            config.api.enabled = false;
        }

        Ok(config)
    }

    /// Create default config for a network.
    pub fn default_for_network(network: &str) -> Self {
        let seed_list = match network {
            "testnet" => testnet_seeds(),
            _ => MAINNET_SEEDS.iter().map(|s| s.to_string()).collect(),
        };

        Self {
            node_name: "neo-rust-node".to_string(),
            chain: network.to_string(),
            network: NetworkConfig {
                seed_list,
                ..Default::default()
            },
            sync: SyncSection::default(),
            api: ApiConfig::default(),
        }
    }

    /// Network magic for the configured chain.
    pub fn magic(&self) -> u32 {
        match (self.network.magic, self.chain.as_str()) {
            (Some(magic), _) => magic,
            (None, "testnet") => TESTNET_MAGIC,
            (None, _) => MAINNET_MAGIC,
        }
    }

    pub fn node_manager_config(&self) -> Result<NodeManagerConfig> {
        let net = &self.network;
        let bind_address = if net.listen {
            let addr: SocketAddr = net
                .bind_address
                .parse()
                .with_context(|| format!("Invalid P2P bind address {}", net.bind_address))?;
            Some(addr)
        } else {
            None
        };

        let mut config = NodeManagerConfig {
            connection: ConnectionConfig {
                magic: self.magic(),
                connect_timeout: Duration::from_secs(net.dial_timeout_secs),
                handshake_timeout: Duration::from_secs(net.handshake_timeout_secs),
                read_timeout: Duration::from_secs(net.read_timeout_secs),
            },
            bind_address,
            seed_list: net.seed_list.clone(),
            min_clients: net.min_clients,
            max_clients: net.max_clients,
            peer_query_interval: Duration::from_secs(net.peer_query_interval_secs),
            pool_check_interval: Duration::from_secs(net.pool_check_interval_secs),
            max_concurrent_dials: net.max_concurrent_dials,
            ..Default::default()
        };
        if let Some(ref agent) = net.user_agent {
            config.user_agent = agent.clone();
        }
        Ok(config)
    }

    /// Build the synchronizer config, rejecting values that would stall
    /// block download.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        let sync = &self.sync;
        if sync.block_cache_capacity == 0 {
            bail!("sync.block_cache_capacity must be at least 1");
        }
        if sync.block_request_limit == 0 || sync.block_request_limit as u64 > MAX_INV_HASHES {
            bail!(
                "sync.block_request_limit must be between 1 and {MAX_INV_HASHES}, got {}",
                sync.block_request_limit
            );
        }
        Ok(SyncConfig {
            tick_interval: Duration::from_millis(sync.tick_interval_ms.max(1)),
            header_look_ahead: sync.header_look_ahead,
            block_cache_capacity: sync.block_cache_capacity,
            block_request_limit: sync.block_request_limit,
            header_timeout: Duration::from_secs(sync.header_timeout_secs),
            block_timeout: Duration::from_secs(sync.block_timeout_secs),
        })
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Seeds for testnet.
fn testnet_seeds() -> Vec<String> {
    (1..=5)
        .map(|i| format!("seed{}.ngd.network:20333", i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default_for_network("mainnet");
        assert_eq!(config.chain, "mainnet");
        assert_eq!(config.magic(), MAINNET_MAGIC);
        assert_eq!(config.network.seed_list.len(), 5);

        let nodes = config.node_manager_config().unwrap();
        assert_eq!(nodes.max_clients, 10);
        assert_eq!(nodes.min_clients, 4);
        assert_eq!(nodes.bind_address.map(|a| a.port()), Some(10333));

        let sync = config.sync_config().unwrap();
        assert_eq!(sync.header_look_ahead, 2000);
        assert_eq!(sync.block_cache_capacity, 500);
        assert_eq!(sync.block_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_testnet_config() {
        let config = NodeConfig::default_for_network("testnet");
        assert_eq!(config.magic(), TESTNET_MAGIC);
        assert!(config.network.seed_list[0].contains("ngd"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neo-node.toml");
        std::fs::write(
            &path,
            r#"
node_name = "edge"
chain = "mainnet"

[network]
max_clients = 3
listen = false

[sync]
block_request_limit = 50
"#,
        )
        .unwrap();

        let args = Args::parse_from(["neo-node", "--seed", "127.0.0.1:20333"]);
        let config = NodeConfig::load(&path, &args).unwrap();
        assert_eq!(config.node_name, "edge");
        assert_eq!(config.network.max_clients, 3);
        assert_eq!(config.network.min_clients, 4);
        assert_eq!(config.network.seed_list, vec!["127.0.0.1:20333".to_string()]);
        assert_eq!(config.sync.block_request_limit, 50);
        assert_eq!(config.sync.block_cache_capacity, 500);
        assert!(config.node_manager_config().unwrap().bind_address.is_none());
        assert!(config.api.enabled);
    }

    #[test]
    fn test_sync_limits_rejected() {
        let mut config = NodeConfig::default_for_network("mainnet");
        config.sync.block_request_limit = MAX_INV_HASHES as usize;
        assert!(config.sync_config().is_ok());

        config.sync.block_request_limit = 600;
        let err = config.sync_config().unwrap_err();
        assert!(err.to_string().contains("block_request_limit"));

        config.sync.block_request_limit = 0;
        assert!(config.sync_config().is_err());

        config.sync.block_request_limit = 50;
        config.sync.block_cache_capacity = 0;
        let err = config.sync_config().unwrap_err();
        assert!(err.to_string().contains("block_cache_capacity"));
    }

    #[test]
    fn test_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.toml");
        let mut config = NodeConfig::default_for_network("testnet");
        config.network.magic = Some(42);
        config.save(&path).unwrap();

        let args = Args::parse_from(["neo-node", "--network", "testnet"]);
        let loaded = NodeConfig::load(&path, &args).unwrap();
        assert_eq!(loaded.magic(), 42);
        assert_eq!(loaded.network.seed_list, config.network.seed_list);
    }
}
