//! Deployment records persisted next to the configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::Config,
    contracts::{ArtifactStore, Contract, Role},
    report::{Deployment, DeploymentFailure, GasReport, Phase, Trail},
};

/// File name of the record of a successful run.
pub const DEPLOYMENT_RECORD_FILENAME: &str = "deployment.json";
/// File name of the record of a failed run.
pub const FAILURE_RECORD_FILENAME: &str = "failed-deployment.json";

/// Hex-encoded SHA-256 of a [`DeploymentConfigHash`].
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Deref, Display, From,
)]
#[serde(transparent)]
pub struct ConfigHash(String);

/// Inputs that determine what a run deploys.
///
/// Timing and output locations are excluded: changing them does not change
/// the deployed contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfigHash {
    pub network_id: String,
    pub gas: u64,
    pub optimizer_enabled: bool,
    pub optimizer_runs: u32,
    /// SHA-256 over the creation bytecode of every contract.
    pub bytecode_fingerprint: String,
}

impl DeploymentConfigHash {
    pub fn new(config: &Config, artifacts: &ArtifactStore) -> Self {
        Self {
            network_id: config.network.network_id.to_string(),
            gas: config.network.gas,
            optimizer_enabled: config.compiler.optimizer_enabled,
            optimizer_runs: config.compiler.optimizer_runs,
            bytecode_fingerprint: artifacts.fingerprint(),
        }
    }

    /// Compute a SHA-256 hash of this configuration.
    pub fn compute_hash(&self) -> Result<ConfigHash> {
        let json =
            serde_json::to_string(self).context("Failed to serialize deployment configuration")?;
        Ok(ConfigHash(hex::encode(Sha256::digest(json.as_bytes()))))
    }
}

/// Record of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub config_hash: ConfigHash,
    /// Unix timestamp of the run.
    pub deployed_at: i64,
    pub indexup_version: String,
    pub chain_id: u64,
    pub sender: Address,
    pub contracts: BTreeMap<Contract, Address>,
    pub registry: BTreeMap<Role, Address>,
    pub owner: Address,
    pub gas: GasReport,
}

impl DeploymentRecord {
    pub fn new(config_hash: ConfigHash, deployment: &Deployment) -> Self {
        Self {
            config_hash,
            deployed_at: chrono::Utc::now().timestamp(),
            indexup_version: env!("CARGO_PKG_VERSION").to_string(),
            chain_id: deployment.chain_id,
            sender: deployment.sender,
            contracts: deployment.addresses.contracts(),
            registry: deployment.registry.clone(),
            owner: deployment.owner,
            gas: deployment.gas,
        }
    }

    /// Write the record to `<outdata>/deployment.json`.
    pub fn save(&self, outdata: &Path) -> Result<PathBuf> {
        save_json(self, &outdata.join(DEPLOYMENT_RECORD_FILENAME))
    }

    /// Load a record from a file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Deployment record does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployment record {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse deployment record {}", path.display()))
    }
}

/// Record of a failed run: where it stopped and what had confirmed before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub config_hash: ConfigHash,
    pub failed_at: i64,
    pub indexup_version: String,
    pub failed_phase: Phase,
    pub last_confirmed: Option<Phase>,
    pub error: String,
    pub deployed: BTreeMap<Contract, Address>,
    pub registered: Vec<Role>,
    /// Gas spent by the transactions that confirmed before the failure.
    pub gas_used: u64,
    pub trail: Trail,
}

impl FailureRecord {
    pub fn new(config_hash: ConfigHash, failure: &DeploymentFailure) -> Self {
        Self {
            config_hash,
            failed_at: chrono::Utc::now().timestamp(),
            indexup_version: env!("CARGO_PKG_VERSION").to_string(),
            failed_phase: failure.failed_phase,
            last_confirmed: failure.last_confirmed(),
            error: failure.error.to_string(),
            deployed: failure.deployed(),
            registered: failure.registered(),
            gas_used: failure.trail.gas_used(),
            trail: failure.trail.clone(),
        }
    }

    /// Write the record to `<outdata>/failed-deployment.json`.
    pub fn save(&self, outdata: &Path) -> Result<PathBuf> {
        save_json(self, &outdata.join(FAILURE_RECORD_FILENAME))
    }
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(value).context("Failed to serialize record")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write record to {}", path.display()))?;

    tracing::info!(path = %path.display(), "Record saved");
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;
    use crate::report::AddressBook;

    fn sample_deployment() -> Deployment {
        let addresses = AddressBook {
            index: Address::repeat_byte(0x01),
            admin: Address::repeat_byte(0x02),
            registry: Address::repeat_byte(0x03),
            registry_storage: Address::repeat_byte(0x04),
            token: Address::repeat_byte(0x05),
            token_storage: Address::repeat_byte(0x06),
            loan: Address::repeat_byte(0x07),
            loan_storage: Address::repeat_byte(0x08),
        };
        Deployment {
            chain_id: 2018,
            sender: Address::repeat_byte(0xee),
            addresses,
            registry: Role::ALL.into_iter().map(|r| (r, addresses.role(r))).collect(),
            owner: addresses.admin,
            gas: GasReport {
                gas_used: 1_500_000,
                gas_price_gwei: Some(21),
            },
            trail: Trail::default(),
        }
    }

    #[test]
    fn test_config_hash_is_deterministic() {
        let config = Config::default();
        let artifacts = ArtifactStore::placeholder();

        let a = DeploymentConfigHash::new(&config, &artifacts).compute_hash().unwrap();
        let b = DeploymentConfigHash::new(&config, &artifacts).compute_hash().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_config_hash_ignores_timing() {
        let artifacts = ArtifactStore::placeholder();
        let config = Config::default();
        let mut slower = Config::default();
        slower.timing.confirmation_timeout_secs = 600;
        let mut unoptimized = Config::default();
        unoptimized.compiler.optimizer_enabled = false;

        let base = DeploymentConfigHash::new(&config, &artifacts).compute_hash().unwrap();
        assert_eq!(
            base,
            DeploymentConfigHash::new(&slower, &artifacts).compute_hash().unwrap()
        );
        assert_ne!(
            base,
            DeploymentConfigHash::new(&unoptimized, &artifacts).compute_hash().unwrap()
        );
    }

    #[test]
    fn test_deployment_record_save_and_load() {
        let dir = TempDir::new("indexup-record").unwrap();
        let outdata = dir.path().join("deployments");
        let config_hash = ConfigHash::from("abc".to_string());
        let record = DeploymentRecord::new(config_hash, &sample_deployment());

        let path = record.save(&outdata).unwrap();
        assert!(path.ends_with(DEPLOYMENT_RECORD_FILENAME));

        let loaded = DeploymentRecord::load_from_file(&path).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.registry.len(), 6);
        assert_eq!(loaded.owner, Address::repeat_byte(0x02));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["registry"].get("registryS").is_some());
        assert!(raw["contracts"].get("RegistryStorage").is_some());
        assert_eq!(raw["config_hash"], "abc");
        assert_eq!(raw["gas"]["gas_used"], 1_500_000);
        assert_eq!(raw["gas"]["gas_price_gwei"], 21);
    }
}
