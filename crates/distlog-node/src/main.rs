//! distlogd: run a distlog node

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use distlog_node::{LogFormat, Node, NodeConfig, PeerConfig, logging};

/// Replicated commit log node
#[derive(Debug, Parser)]
#[command(name = "distlogd", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    bind: Option<String>,

    /// Node name
    #[arg(long)]
    name: Option<String>,

    /// Peer to replicate from, as name=addr (repeatable)
    #[arg(long = "peer")]
    peers: Vec<PeerConfig>,

    /// ACL policy file
    #[arg(long)]
    acl: Option<PathBuf>,

    /// Default log level (RUST_LOG overrides)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs on the console
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => NodeConfig::default(),
        };

        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(name) = self.name {
            config.node_name = name;
        }
        if let Some(acl) = self.acl {
            config.acl_policy = Some(acl);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.json {
            config.logging.format = LogFormat::Json;
        }
        config.peers.extend(self.peers);

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;
    let _guard = logging::init(&config.logging)?;

    let node = Node::new(config).await.context("creating node")?;
    let addr = node.start().await.context("starting node")?;
    info!(%addr, "distlogd running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    node.stop().await?;

    Ok(())
}
