//! Configuration for blobsync nodes

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This node's identity and storage
    pub node: NodeConfig,

    /// Coordination service connection
    pub coordination: CoordinationConfig,

    /// Reconciliation loop tuning
    pub sync: SyncConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            coordination: CoordinationConfig::default(),
            sync: SyncConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Host advertised to peers and recorded in the coordination service
    pub host: String,

    /// Port advertised to peers
    pub port: u16,

    /// Bind address for the HTTP API
    pub bind_addr: SocketAddr,

    /// Directory holding blob data and metadata
    pub data_dir: PathBuf,

    /// Whether this node accepts writes. Election is handled elsewhere.
    pub leader: bool,

    /// Advertised address of the current leader, used in redirects
    pub leader_addr: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6627,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 6627)),
            data_dir: PathBuf::from("./blobsync-data"),
            leader: false,
            leader_addr: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationBackend {
    /// In-process registry, only meaningful for single-process clusters
    #[default]
    Memory,
    Etcd,
}

/// Coordination service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub backend: CoordinationBackend,

    /// etcd endpoints (etcd backend only)
    pub endpoints: Vec<String>,

    /// Namespace prepended to every coordination path
    pub root: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            backend: CoordinationBackend::Memory,
            endpoints: Vec::new(),
            root: "/blobsync".to_string(),
        }
    }
}

/// Synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between reconciliation passes
    pub interval_secs: u64,

    /// Timeout for a single peer request
    pub peer_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 120,
            peer_timeout_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then `BLOBSYNC__*`
    /// environment variables (e.g. `BLOBSYNC__NODE__PORT=7000`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("BLOBSYNC")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("coordination.endpoints")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.host.trim().is_empty() {
            return Err(Error::InvalidConfig("node.host cannot be empty".into()));
        }
        if self.node.port == 0 {
            return Err(Error::InvalidConfig("node.port cannot be 0".into()));
        }
        if self.sync.interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "sync.interval_secs must be positive".into(),
            ));
        }
        if self.coordination.backend == CoordinationBackend::Etcd
            && self.coordination.endpoints.is_empty()
        {
            return Err(Error::InvalidConfig(
                "etcd endpoints are required for the etcd backend".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.interval(), Duration::from_secs(120));
        assert_eq!(config.coordination.backend, CoordinationBackend::Memory);
    }

    #[test]
    fn test_etcd_requires_endpoints() {
        let mut config = Config::default();
        config.coordination.backend = CoordinationBackend::Etcd;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.coordination.endpoints = vec!["http://127.0.0.1:2379".into()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[node]
host = "nimbus-2.example.com"
port = 7000
leader = true

[coordination]
backend = "etcd"
endpoints = ["http://10.0.0.1:2379"]

[sync]
interval_secs = 15
"#
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.node.host, "nimbus-2.example.com");
        assert_eq!(config.node.port, 7000);
        assert!(config.node.leader);
        assert_eq!(config.coordination.backend, CoordinationBackend::Etcd);
        assert_eq!(config.sync.interval_secs, 15);
        // untouched sections keep their defaults
        assert_eq!(config.sync.peer_timeout_ms, 30_000);
        assert_eq!(config.coordination.root, "/blobsync");
    }
}
