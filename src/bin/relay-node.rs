#![forbid(unsafe_code)]
//! Relay node entry point

use clap::Parser;
use ledger_relay::config::load_config_from;
use ledger_relay::node::Node;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-node", about = "Peer relay and ledger sync node")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Websocket listen port (overrides network.p2p_port)
    #[arg(short, long)]
    port: Option<u16>,

    /// HTTP query API port (overrides network.api_port)
    #[arg(long)]
    api_port: Option<u16>,

    /// Node identifier echoed in handshakes (overrides node.id)
    #[arg(long)]
    node_id: Option<String>,

    /// Snapshot database path (overrides persistence.path)
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = load_config_from(&args.config)?;
    if let Some(port) = args.port {
        config.network.p2p_port = port;
    }
    if let Some(port) = args.api_port {
        config.network.api_port = Some(port);
    }
    if let Some(id) = args.node_id {
        config.node.id = id;
    }
    if let Some(db) = args.db {
        config.persistence.path = db;
    }

    let node = Node::init(config)?;
    node.run().await?;
    Ok(())
}
