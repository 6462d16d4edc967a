//! Configuration management for the relay node

use crate::error::{RelayError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub genesis: GenesisConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_p2p_port")]
    pub p2p_port: u16,
    /// HTTP query API port; the API is not served when unset.
    #[serde(default)]
    pub api_port: Option<u16>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            p2p_port: default_p2p_port(),
            api_port: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            save_interval_secs: default_save_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_block_limit")]
    pub default_block_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_block_limit: default_block_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Allocation {
    pub address: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenesisConfig {
    #[serde(default = "default_seed")]
    pub seed: String,
    #[serde(default = "default_allocations")]
    pub allocations: Vec<Allocation>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            allocations: default_allocations(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.node.id.is_empty() {
            return Err(RelayError::ConfigError("node.id must not be empty".into()));
        }
        if self.persistence.path.is_empty() {
            return Err(RelayError::ConfigError(
                "persistence.path must be set in config.toml".into(),
            ));
        }
        if self.persistence.save_interval_secs == 0 {
            return Err(RelayError::ConfigError(
                "persistence.save_interval_secs must be positive".into(),
            ));
        }
        if self.liveness.ping_interval_secs == 0 {
            return Err(RelayError::ConfigError(
                "liveness.ping_interval_secs must be positive".into(),
            ));
        }
        if self.sync.default_block_limit == 0 {
            return Err(RelayError::ConfigError(
                "sync.default_block_limit must be positive".into(),
            ));
        }
        if self.genesis.allocations.is_empty() {
            return Err(RelayError::ConfigError(
                "genesis.allocations must list at least one bucket".into(),
            ));
        }
        if let Some(bad) = self
            .genesis
            .allocations
            .iter()
            .find(|a| a.address.is_empty() || a.amount < 0.0)
        {
            return Err(RelayError::ConfigError(format!(
                "invalid genesis allocation {:?}",
                bad
            )));
        }
        Ok(())
    }
}

pub fn load_config() -> Result<Config> {
    load_config_from("config.toml")
}

/// Loads configuration from `path`, falling back to defaults when the file is absent.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config> {
    let config_str = match fs::read_to_string(path.as_ref()) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let config: Config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str)?
    };

    config.validate()?;
    Ok(config)
}

fn default_node_id() -> String {
    format!("node-{}", hex::encode(rand::random::<[u8; 4]>()))
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_p2p_port() -> u16 {
    8765
}

fn default_db_path() -> String {
    "./data/ledger.db".to_string()
}

fn default_save_interval() -> u64 {
    60
}

fn default_ping_interval() -> u64 {
    30
}

fn default_block_limit() -> usize {
    100
}

fn default_seed() -> String {
    "genesis".to_string()
}

fn default_allocations() -> Vec<Allocation> {
    [
        ("treasury", 100_000_000.0),
        ("team", 20_000_000.0),
        ("validators", 10_000_000.0),
        ("community_rewards", 30_000_000.0),
        ("liquidity_pool", 40_000_000.0),
    ]
    .into_iter()
    .map(|(address, amount)| Allocation {
        address: address.to_string(),
        amount,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.network.p2p_port, 8765);
        assert_eq!(config.sync.default_block_limit, 100);
        assert_eq!(config.genesis.allocations.len(), 5);
        assert_eq!(config.genesis.allocations[0].address, "treasury");
        assert!(config.node.id.starts_with("node-"));
    }

    #[test]
    fn test_partial_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[node]\nid = \"relay-a\"\n\n[network]\np2p_port = 9000\napi_port = 9001\n\n\
             [[genesis.allocations]]\naddress = \"alice\"\namount = 42.0\n"
        )
        .unwrap();

        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.node.id, "relay-a");
        assert_eq!(config.network.p2p_port, 9000);
        assert_eq!(config.network.api_port, Some(9001));
        assert_eq!(config.persistence.save_interval_secs, 60);
        assert_eq!(
            config.genesis.allocations,
            vec![Allocation {
                address: "alice".into(),
                amount: 42.0
            }]
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[liveness]\nping_interval_secs = 0\n").unwrap();
        assert!(matches!(
            load_config_from(file.path()),
            Err(RelayError::ConfigError(_))
        ));
    }
}
