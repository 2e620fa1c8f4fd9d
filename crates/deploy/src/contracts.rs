//! Contract identities, registry roles and compiled artifacts.

use std::path::Path;

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default directory holding compiled contract artifacts.
pub const DEFAULT_ARTIFACTS_DIR: &str = "build/contracts";

/// The contracts bootstrapped by a deployment run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Contract {
    Index,
    Admin,
    Registry,
    RegistryStorage,
    Token,
    TokenStorage,
    Loan,
    LoanStorage,
}

impl Contract {
    /// All contracts, in declaration order.
    pub const ALL: [Contract; 8] = [
        Contract::Index,
        Contract::Admin,
        Contract::Registry,
        Contract::RegistryStorage,
        Contract::Token,
        Contract::TokenStorage,
        Contract::Loan,
        Contract::LoanStorage,
    ];

    /// Name of the compiled artifact, without the `.json` extension.
    pub fn artifact_name(self) -> &'static str {
        match self {
            Contract::Index => "Index",
            Contract::Admin => "Admin",
            Contract::Registry => "Registry",
            Contract::RegistryStorage => "RegistryStorage",
            Contract::Token => "Token",
            Contract::TokenStorage => "TokenStorage",
            Contract::Loan => "Loan",
            Contract::LoanStorage => "LoanStorage",
        }
    }

    /// The registry role this contract fills, if any.
    ///
    /// `Index` and `Admin` are not registered into the index.
    pub fn role(self) -> Option<Role> {
        Role::ALL.into_iter().find(|role| role.contract() == self)
    }

    fn position(self) -> usize {
        self as usize
    }
}

/// A logical role registered in the index under a fixed key.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
pub enum Role {
    #[strum(serialize = "token")]
    #[serde(rename = "token")]
    Token,
    #[strum(serialize = "tokenS")]
    #[serde(rename = "tokenS")]
    TokenStorage,
    #[strum(serialize = "loan")]
    #[serde(rename = "loan")]
    Loan,
    #[strum(serialize = "loanS")]
    #[serde(rename = "loanS")]
    LoanStorage,
    #[strum(serialize = "registry")]
    #[serde(rename = "registry")]
    Registry,
    #[strum(serialize = "registryS")]
    #[serde(rename = "registryS")]
    RegistryStorage,
}

impl Role {
    /// Every role that must be registered before ownership is handed off.
    pub const ALL: [Role; 6] = [
        Role::Token,
        Role::TokenStorage,
        Role::Loan,
        Role::LoanStorage,
        Role::Registry,
        Role::RegistryStorage,
    ];

    /// The key under which the index stores this role.
    pub fn key(self) -> &'static str {
        self.into()
    }

    /// The contract deployed for this role.
    pub fn contract(self) -> Contract {
        match self {
            Role::Token => Contract::Token,
            Role::TokenStorage => Contract::TokenStorage,
            Role::Loan => Contract::Loan,
            Role::LoanStorage => Contract::LoanStorage,
            Role::Registry => Contract::Registry,
            Role::RegistryStorage => Contract::RegistryStorage,
        }
    }
}

/// Compiled artifact file, as emitted by truffle into `build/contracts`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    contract_name: Option<String>,
    bytecode: Option<String>,
}

/// Creation bytecode for every contract of the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    bytecode: [Bytes; 8],
}

impl ArtifactStore {
    /// Load `<dir>/<Name>.json` for every contract.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut codes = Vec::with_capacity(Contract::ALL.len());
        for contract in Contract::ALL {
            codes.push(Self::load_one(dir, contract)?);
        }

        let bytecode = codes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Expected one artifact per contract"))?;

        tracing::info!(dir = %dir.display(), "Contract artifacts loaded");
        Ok(Self { bytecode })
    }

    fn load_one(dir: &Path, contract: Contract) -> Result<Bytes> {
        let path = dir.join(format!("{}.json", contract.artifact_name()));
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact for {contract} at {}", path.display()))?;
        let artifact: ArtifactFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        if let Some(name) = &artifact.contract_name {
            if name != contract.artifact_name() {
                anyhow::bail!(
                    "Artifact {} declares contract '{}', expected '{}'",
                    path.display(),
                    name,
                    contract.artifact_name()
                );
            }
        }

        let raw = artifact
            .bytecode
            .with_context(|| format!("Artifact {} has no bytecode field", path.display()))?;
        let code = hex::decode(raw.trim().trim_start_matches("0x"))
            .with_context(|| format!("Artifact {} has invalid bytecode hex", path.display()))?;

        if code.is_empty() {
            anyhow::bail!(
                "Artifact {} has empty bytecode ({contract} is abstract or was not compiled)",
                path.display()
            );
        }

        tracing::debug!(%contract, size = code.len(), "Loaded contract bytecode");
        Ok(Bytes::from(code))
    }

    /// Synthetic bytecode for dry runs against the in-memory environment.
    ///
    /// Each code is a fixed preamble followed by the artifact name and a zero
    /// terminator, so no contract's code is a prefix of another's.
    pub fn placeholder() -> Self {
        Self {
            bytecode: Contract::ALL.map(|contract| {
                let mut code = vec![0x60, 0x80, 0x60, 0x40, 0x52];
                code.extend_from_slice(contract.artifact_name().as_bytes());
                code.push(0x00);
                Bytes::from(code)
            }),
        }
    }

    /// Creation bytecode of a contract.
    pub fn bytecode(&self, contract: Contract) -> &Bytes {
        &self.bytecode[contract.position()]
    }

    /// Iterate over `(contract, bytecode)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Contract, &Bytes)> {
        Contract::ALL.into_iter().zip(self.bytecode.iter())
    }

    /// SHA-256 over all bytecode, in contract order, hex-encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for code in &self.bytecode {
            hasher.update((code.len() as u64).to_be_bytes());
            hasher.update(code);
        }
        hex::encode(hasher.finalize())
    }
}
