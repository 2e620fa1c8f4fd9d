//! Static network, compiler and timing configuration.

use std::{fmt, path::Path, path::PathBuf, str::FromStr, time::Duration};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{confirm::ConfirmationTiming, contracts::DEFAULT_ARTIFACTS_DIR};

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "Indexup.toml";

/// Network a deployment is allowed to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawNetworkId", into = "String")]
pub enum NetworkId {
    /// `*`: any network.
    Any,
    Id(u64),
}

impl NetworkId {
    pub fn matches(self, chain_id: u64) -> bool {
        match self {
            NetworkId::Any => true,
            NetworkId::Id(id) => id == chain_id,
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkId::Any => write!(f, "*"),
            NetworkId::Id(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for NetworkId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "*" => Ok(NetworkId::Any),
            id => id
                .parse()
                .map(NetworkId::Id)
                .with_context(|| format!("Invalid network id '{}': expected '*' or a number", s)),
        }
    }
}

/// A network id as written in TOML or the environment: a number or a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawNetworkId {
    Number(u64),
    Text(String),
}

impl TryFrom<RawNetworkId> for NetworkId {
    type Error = anyhow::Error;

    fn try_from(raw: RawNetworkId) -> Result<Self> {
        match raw {
            RawNetworkId::Number(id) => Ok(NetworkId::Id(id)),
            RawNetworkId::Text(text) => text.parse(),
        }
    }
}

impl From<NetworkId> for String {
    fn from(id: NetworkId) -> Self {
        id.to_string()
    }
}

/// Connection to the execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub network_id: NetworkId,
    /// Gas limit attached to every deployment and call.
    pub gas: u64,
    /// Sending account. The node's first account when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Gas price in gwei used to price the gas report. Transactions are sent
    /// at the node's price regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price_gwei: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8545,
            network_id: NetworkId::Id(2018),
            gas: 4_600_000,
            from: None,
            gas_price_gwei: None,
        }
    }
}

impl NetworkConfig {
    /// HTTP endpoint of the node.
    pub fn rpc_url(&self) -> Result<Url> {
        Url::parse(&format!("http://{}:{}", self.host, self.port))
            .with_context(|| format!("Invalid node endpoint {}:{}", self.host, self.port))
    }
}

/// Solidity compiler settings. Only used when building the contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub optimizer_enabled: bool,
    pub optimizer_runs: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            optimizer_enabled: true,
            optimizer_runs: 200,
        }
    }
}

impl CompilerConfig {
    /// The `settings` object of a solc standard-JSON input.
    pub fn solc_settings(&self) -> serde_json::Value {
        serde_json::json!({
            "optimizer": {
                "enabled": self.optimizer_enabled,
                "runs": self.optimizer_runs,
            }
        })
    }
}

/// Confirmation waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: 120,
            poll_interval_ms: 500,
        }
    }
}

impl From<&TimingConfig> for ConfirmationTiming {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            timeout: Duration::from_secs(timing.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(timing.poll_interval_ms),
        }
    }
}

/// Complete configuration of a deployment.
///
/// Serialized to and from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the compiled contract artifacts.
    pub artifacts: PathBuf,
    /// Directory where deployment records are written.
    pub outdata: PathBuf,
    pub network: NetworkConfig,
    pub compiler: CompilerConfig,
    pub timing: TimingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifacts: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            outdata: PathBuf::from("deployments"),
            network: NetworkConfig::default(),
            compiler: CompilerConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl Config {
    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from `Indexup.toml` inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file or directory not found: {}", path.display());
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        let config: Self = toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config to TOML")
    }

    pub fn confirmation_timing(&self) -> ConfirmationTiming {
        ConfirmationTiming::from(&self.timing)
    }
}
