//! Seed resolution.
//!
//! Seed list entries are `host:port` strings. Hosts are resolved through the
//! system resolver on the blocking pool, each bounded by a timeout.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default mainnet seed list.
pub const MAINNET_SEEDS: &[&str] = &[
    "seed1.neo.org:10333",
    "seed2.neo.org:10333",
    "seed3.neo.org:10333",
    "seed4.neo.org:10333",
    "seed5.neo.org:10333",
];

/// Resolves configured seeds into dialable addresses.
#[derive(Debug, Clone)]
pub struct SeedResolver {
    seeds: Vec<String>,
    /// DNS resolution timeout per seed.
    dns_timeout: Duration,
    default_port: u16,
}

impl SeedResolver {
    pub fn new(seeds: Vec<String>, default_port: u16) -> Self {
        Self {
            seeds,
            dns_timeout: Duration::from_secs(5),
            default_port,
        }
    }

    /// Set DNS resolution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = timeout;
        self
    }

    /// Resolve every seed, skipping failures. The result is deduplicated.
    pub async fn resolve_all(&self) -> Vec<SocketAddr> {
        let mut peers = Vec::new();

        for seed in &self.seeds {
            match self.resolve_seed(seed).await {
                Ok(addrs) => {
                    debug!(seed = %seed, count = addrs.len(), "Resolved seed");
                    peers.extend(addrs);
                }
                Err(e) => {
                    warn!(seed = %seed, error = %e, "Failed to resolve seed");
                }
            }
        }

        peers.sort();
        peers.dedup();

        info!(count = peers.len(), "Seed addresses resolved");
        peers
    }

    async fn resolve_seed(&self, seed: &str) -> Result<Vec<SocketAddr>, std::io::Error> {
        if let Some(addr) = parse_socket_addr(seed, self.default_port) {
            return Ok(vec![addr]);
        }

        let target = if seed.contains(':') {
            seed.to_string()
        } else {
            format!("{}:{}", seed, self.default_port)
        };

        let result = timeout(
            self.dns_timeout,
            tokio::task::spawn_blocking(move || {
                target.to_socket_addrs().map(|iter| iter.collect::<Vec<_>>())
            }),
        )
        .await;

        match result {
            Ok(Ok(Ok(addrs))) => Ok(addrs),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(e)) => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Task join error: {}", e),
            )),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "DNS resolution timed out",
            )),
        }
    }
}

/// Parse a literal `ip[:port]` without touching DNS.
fn parse_socket_addr(addr: &str, default_port: u16) -> Option<SocketAddr> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        return Some(socket_addr);
    }
    addr.parse::<std::net::IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, default_port))
}

/// Parse a peer address string (with optional port), resolving hostnames.
pub fn parse_peer_address(addr: &str, default_port: u16) -> Option<SocketAddr> {
    if let Some(socket_addr) = parse_socket_addr(addr, default_port) {
        return Some(socket_addr);
    }

    // Try DNS resolution (blocking)
    let target = if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{}:{}", addr, default_port)
    };
    target.to_socket_addrs().ok()?.next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer_address() {
        // With port
        let addr = parse_peer_address("127.0.0.1:20333", 10333);
        assert_eq!(addr.map(|a| a.port()), Some(20333));

        // Without port (uses default)
        let addr = parse_peer_address("127.0.0.1", 10333);
        assert_eq!(addr.map(|a| a.port()), Some(10333));
    }

    #[tokio::test]
    async fn test_literal_seeds_skip_dns() {
        let resolver = SeedResolver::new(
            vec![
                "10.0.0.1:20333".into(),
                "10.0.0.1:20333".into(),
                "10.0.0.2".into(),
            ],
            10333,
        );
        let peers = resolver.resolve_all().await;
        assert_eq!(
            peers,
            vec![
                "10.0.0.1:20333".parse().unwrap(),
                "10.0.0.2:10333".parse().unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn test_unresolvable_seed_is_skipped() {
        let resolver = SeedResolver::new(vec!["host.invalid:1".into()], 10333)
            .with_timeout(Duration::from_millis(500));
        assert!(resolver.resolve_all().await.is_empty());
    }
}
