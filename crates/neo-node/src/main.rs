//! NEO Node - P2P synchronization node for the NEO blockchain.
//!
//! This is the main entry point for the neo-node binary.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// NEO blockchain P2P node.
#[derive(Parser, Debug)]
#[command(name = "neo-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "neo-node.toml")]
    config: PathBuf,

    /// Network to connect to
    #[arg(short, long, default_value = "mainnet")]
    network: String,

    /// API bind address
    #[arg(long)]
    api_bind: Option<String>,

    /// P2P bind address
    #[arg(long)]
    p2p_bind: Option<String>,

    /// Seed address (repeatable); replaces the configured seed list
    #[arg(long)]
    seed: Vec<String>,

    /// Do not serve the diagnostic API
    #[arg(long)]
    no_api: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print version and exit
    #[arg(long)]
    version_info: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version_info {
        print_version();
        return Ok(());
    }

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting NEO Rust Node v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = NodeConfig::load(&args.config, &args)?;

    info!("Chain: {} (magic {})", config.chain, config.magic());
    info!("P2P: {}", config.network.bind_address);
    if config.api.enabled {
        info!("API: {}", config.api.bind_address);
    }

    let node = Node::new(config)?;

    // Handle shutdown signals
    let shutdown = node.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    node.run().await?;

    info!("NEO node stopped");
    Ok(())
}

fn print_version() {
    println!("NEO Rust Node");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Protocol: {}", neo_network::PROTOCOL_VERSION);
    println!();
    println!("Built with:");
    println!("  Tokio for async runtime");
    println!("  Axum for the diagnostic API");
}
