//! indexup-deploy - Deployment library for the Index contract suite.
//!
//! This crate deploys the `Index` registry together with its role contracts
//! (`Token`, `Loan`, `Registry` and their storage contracts) and the `Admin`
//! access-control contract, in dependency order. It then registers every role
//! in the index and transfers ownership of the index to the admin.
//!
//! # Example
//!
//! ```no_run
//! use indexup_deploy::{ArtifactStore, Config, DeploySettings, Orchestrator, RpcEnvironment};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default();
//! let env = RpcEnvironment::new(config.network.rpc_url()?)?;
//! let artifacts = ArtifactStore::load(&config.artifacts)?;
//!
//! let deployment = Orchestrator::new(env, artifacts, DeploySettings::from(&config))
//!     .deploy_all()
//!     .await?;
//! println!("index at {}", deployment.addresses.index);
//! # Ok(())
//! # }
//! ```

pub mod abi;
mod config;
mod confirm;
mod contracts;
mod env;
mod error;
pub mod memory;
mod orchestrator;
mod record;
mod report;
pub mod rpc;

pub use config::{
    CONFIG_FILENAME, CompilerConfig, Config, NetworkConfig, NetworkId, TimingConfig,
};
pub use confirm::{
    Barrier, ConfirmationTiming, ConfirmedDeployment, PendingDeployment, Settled,
    wait_for_receipt,
};
pub use contracts::{ArtifactStore, Contract, DEFAULT_ARTIFACTS_DIR, Role};
pub use env::{ExecutionEnvironment, Receipt, TransactionRequest};
pub use error::{DeployError, LastQueryError};
pub use memory::{ChainEvent, Fault, MemoryEnvironment};
pub use orchestrator::{DeploySettings, Orchestrator};
pub use record::{
    ConfigHash, DEPLOYMENT_RECORD_FILENAME, DeploymentConfigHash, DeploymentRecord,
    FAILURE_RECORD_FILENAME, FailureRecord,
};
pub use report::{
    AddressBook, Deployment, DeploymentFailure, GasReport, Operation, Outcome, Phase, StepRecord,
    Trail,
};
pub use rpc::RpcEnvironment;
