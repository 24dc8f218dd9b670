//! Configuration for a distlog node
//!
//! Loaded from TOML:
//!
//! ```toml
//! node_name = "node-1"
//! data_dir = "./node-1"
//! bind_addr = "127.0.0.1:8401"
//! acl_policy = "./policy.toml"
//! connect_timeout_ms = 5000
//!
//! [log.segment]
//! max_store_bytes = 1048576
//! max_index_bytes = 12288
//!
//! [[peers]]
//! name = "node-2"
//! addr = "127.0.0.1:8402"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use distlog_storage::LogConfig;

use crate::error::{NodeError, NodeResult};
use crate::logging::LoggingConfig;

/// Default listen address
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8400";

/// A statically configured peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub addr: String,
}

impl PeerConfig {
    /// Create a peer entry
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

/// Parses `name=addr`
impl FromStr for PeerConfig {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, addr)) if !name.is_empty() && !addr.is_empty() => {
                Ok(Self::new(name, addr))
            }
            _ => Err(NodeError::Config(format!(
                "invalid peer '{}', expected name=addr",
                s
            ))),
        }
    }
}

/// Configuration for a [`Node`](crate::Node)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name of this node; also the identity used when replicating
    pub node_name: String,
    /// Base directory for all node data
    pub data_dir: PathBuf,
    /// Address the log server listens on
    pub bind_addr: String,
    /// Commit log configuration
    pub log: LogConfig,
    /// Peers to replicate from at start
    pub peers: Vec<PeerConfig>,
    /// ACL policy file; every request is allowed when unset
    pub acl_policy: Option<PathBuf>,
    /// Timeout for connecting to a peer
    pub connect_timeout_ms: u64,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "distlog".to_string(),
            data_dir: PathBuf::from("./distlog-data"),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            log: LogConfig::default(),
            peers: Vec::new(),
            acl_policy: None,
            connect_timeout_ms: 5_000,
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a configuration with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML configuration
    pub fn from_toml_str(s: &str) -> NodeResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Set the node name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    /// Set the listen address
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Set the commit log configuration
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Add a static peer
    pub fn with_peer(mut self, peer: PeerConfig) -> Self {
        self.peers.push(peer);
        self
    }

    /// Set the ACL policy file
    pub fn with_acl_policy(mut self, path: impl Into<PathBuf>) -> Self {
        self.acl_policy = Some(path.into());
        self
    }

    /// Set the peer connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the logging configuration
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Directory holding the commit log
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("log")
    }

    /// Peer connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.log_dir(), PathBuf::from("./distlog-data/log"));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let config = NodeConfig::from_toml_str(
            r#"
            node_name = "node-1"
            data_dir = "/tmp/node-1"
            bind_addr = "127.0.0.1:9001"

            [log.segment]
            max_store_bytes = 4096
            max_index_bytes = 120

            [[peers]]
            name = "node-2"
            addr = "127.0.0.1:9002"

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.node_name, "node-1");
        assert_eq!(config.log.segment.max_store_bytes, 4096);
        assert_eq!(config.log.segment.max_index_bytes, 120);
        assert_eq!(config.log.segment.initial_offset, 0);
        assert_eq!(config.peers, vec![PeerConfig::new("node-2", "127.0.0.1:9002")]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.connect_timeout_ms, 5_000);
    }

    #[test]
    fn test_invalid_toml() {
        let result = NodeConfig::from_toml_str("bind_addr = 5");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn test_peer_from_str() {
        let peer: PeerConfig = "node-2=127.0.0.1:9002".parse().unwrap();
        assert_eq!(peer, PeerConfig::new("node-2", "127.0.0.1:9002"));

        assert!("node-2".parse::<PeerConfig>().is_err());
        assert!("=127.0.0.1:9002".parse::<PeerConfig>().is_err());
    }

    #[test]
    fn test_builders() {
        let config = NodeConfig::with_data_dir("/tmp/x")
            .with_name("a")
            .with_bind_addr("127.0.0.1:0")
            .with_peer(PeerConfig::new("b", "127.0.0.1:1"))
            .with_acl_policy("/tmp/policy.toml")
            .with_connect_timeout(Duration::from_millis(250));

        assert_eq!(config.node_name, "a");
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.acl_policy, Some(PathBuf::from("/tmp/policy.toml")));
        assert_eq!(config.connect_timeout_ms, 250);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "node_name = \"from-file\"\n").unwrap();

        assert_eq!(NodeConfig::load(&path).unwrap().node_name, "from-file");
        assert!(NodeConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
