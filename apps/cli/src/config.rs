//! CLI configuration file support.
//!
//! Configuration precedence:
//! 1. CLI arguments (handled by clap)
//! 2. Explicit `--config` file
//! 3. Local config file (./.feltflowrc)
//! 4. Global config file (~/.feltflow/config.toml)
//! 5. Defaults

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_API_ENDPOINT: &str = "https://app.feltlabs.ai";
pub const DEFAULT_CHAIN_ID: u64 = 80001;

/// Chain access settings for one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subgraph_url: Option<String>,
    #[serde(default)]
    pub metadata_cache_url: Option<String>,
    /// Wallet gateway holding the payer key.
    #[serde(default)]
    pub gateway_url: Option<String>,
}

impl NetworkConfig {
    fn merge(&mut self, other: &Self) {
        if let Some(ref name) = other.name {
            self.name = Some(name.clone());
        }
        if let Some(ref url) = other.subgraph_url {
            self.subgraph_url = Some(url.clone());
        }
        if let Some(ref url) = other.metadata_cache_url {
            self.metadata_cache_url = Some(url.clone());
        }
        if let Some(ref url) = other.gateway_url {
            self.gateway_url = Some(url.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Job store backend.
    #[serde(default)]
    pub api_endpoint: Option<String>,

    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub poll_interval_secs: Option<u64>,

    /// Give up waiting for a batch of jobs after this long.
    #[serde(default)]
    pub poll_deadline_secs: Option<u64>,

    #[serde(default)]
    pub iterations: Option<usize>,

    /// Keyed by chain id.
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl FlowConfig {
    /// Built-in settings: the Mumbai test network.
    pub fn builtin() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            DEFAULT_CHAIN_ID.to_string(),
            NetworkConfig {
                name: Some("polygon-test".to_string()),
                subgraph_url: Some("https://v4.subgraph.mumbai.oceanprotocol.com".to_string()),
                metadata_cache_url: Some("https://v4.aquarius.oceanprotocol.com".to_string()),
                gateway_url: None,
            },
        );
        Self { networks, ..Self::default() }
    }

    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".feltflow")
            .join("config.toml")
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".feltflowrc")
    }

    /// Built-in settings overlaid with the global, local and explicit files.
    ///
    /// Missing global or local files are skipped; a missing explicit file and
    /// any unparsable file are errors.
    pub fn discover_and_load(explicit: Option<&Path>) -> ConfigResult<Self> {
        let mut config = Self::builtin();

        for path in [Self::default_global_path(), Self::default_local_path()] {
            match Self::load_from_file(&path) {
                Ok(found) => config.merge(&found),
                Err(ConfigError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        if let Some(path) = explicit {
            config.merge(&Self::load_from_file(path)?);
        }
        Ok(config)
    }

    /// Values set in `other` win; networks are merged field by field.
    pub fn merge(&mut self, other: &Self) {
        if let Some(ref endpoint) = other.api_endpoint {
            self.api_endpoint = Some(endpoint.clone());
        }
        if let Some(ref log_level) = other.log_level {
            self.log_level = Some(log_level.clone());
        }
        if other.poll_interval_secs.is_some() {
            self.poll_interval_secs = other.poll_interval_secs;
        }
        if other.poll_deadline_secs.is_some() {
            self.poll_deadline_secs = other.poll_deadline_secs;
        }
        if other.iterations.is_some() {
            self.iterations = other.iterations;
        }
        for (chain, network) in &other.networks {
            self.networks.entry(chain.clone()).or_default().merge(network);
        }
    }

    pub fn network(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.get(&chain_id.to_string())
    }
}
