//! Dependency-ordered deployment and wiring of the index and its roles.
//!
//! The run is a fixed linear sequence of phases:
//!
//! 1. deploy `Index`
//! 2. confirm `Index`
//! 3. deploy `Registry`, `Token`, `TokenStorage`, `LoanStorage`, `Loan` and `Admin`
//!    against the index address
//! 4. confirm `Admin`
//! 5. deploy `RegistryStorage` against the index and admin addresses
//! 6. confirm every outstanding deployment
//! 7. register the six roles in the index
//! 8. transfer ownership of the index to `Admin`
//!
//! The first failure ends the run. Ownership is only ever transferred after
//! all six registrations confirmed, so a failed run leaves the index owned by
//! the sender and fixable by hand.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, B256, Bytes};

use crate::{
    abi,
    config::{Config, NetworkId},
    confirm::{
        Barrier, ConfirmationTiming, ConfirmedDeployment, PendingDeployment, wait_for_receipt,
    },
    contracts::{ArtifactStore, Contract, Role},
    env::{ExecutionEnvironment, TransactionRequest},
    error::DeployError,
    report::{
        AddressBook, Deployment, DeploymentFailure, GasReport, Operation, Outcome, Phase, Trail,
    },
};

/// Contracts deployed in phase 3, each taking only the index address.
const INDEX_DEPENDENTS: [Contract; 6] = [
    Contract::Registry,
    Contract::Token,
    Contract::TokenStorage,
    Contract::LoanStorage,
    Contract::Loan,
    Contract::Admin,
];

/// Settings of a run, derived from the [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    pub network_id: NetworkId,
    pub gas: u64,
    pub from: Option<Address>,
    /// Price used to report the cost of a run. Never sent with transactions.
    pub gas_price_gwei: Option<u64>,
    pub timing: ConfirmationTiming,
}

impl From<&Config> for DeploySettings {
    fn from(config: &Config) -> Self {
        Self {
            network_id: config.network.network_id,
            gas: config.network.gas,
            from: config.network.from,
            gas_price_gwei: config.network.gas_price_gwei,
            timing: config.confirmation_timing(),
        }
    }
}

/// Proof that every role was registered in the index.
///
/// Only produced by the registration phase, and required to transfer ownership.
#[derive(Debug)]
struct Registered {
    entries: BTreeMap<Role, Address>,
}

/// An error tagged with the phase it happened in.
struct PhaseError {
    phase: Phase,
    error: DeployError,
}

trait AtPhase<T> {
    fn at(self, phase: Phase) -> Result<T, PhaseError>;
}

impl<T> AtPhase<T> for Result<T, DeployError> {
    fn at(self, phase: Phase) -> Result<T, PhaseError> {
        self.map_err(|error| PhaseError { phase, error })
    }
}

/// Drives a deployment run against an execution environment.
pub struct Orchestrator<E> {
    env: E,
    artifacts: ArtifactStore,
    settings: DeploySettings,
}

impl<E: ExecutionEnvironment> Orchestrator<E> {
    pub fn new(env: E, artifacts: ArtifactStore, settings: DeploySettings) -> Self {
        Self {
            env,
            artifacts,
            settings,
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    /// Deploy every contract, register the roles and hand the index to the admin.
    ///
    /// Each call deploys a fresh, independent set of contracts.
    pub async fn deploy_all(&self) -> Result<Deployment, DeploymentFailure> {
        tracing::info!("Starting deployment run...");

        let mut trail = Trail::default();
        match self.run(&mut trail).await {
            Ok((chain_id, sender, addresses, registered)) => {
                let gas = GasReport::new(&trail, self.settings.gas_price_gwei);
                let cost = gas.cost_eth();
                tracing::info!(
                    index = %addresses.index,
                    owner = %addresses.admin,
                    gas_used = gas.gas_used,
                    cost = cost.as_deref(),
                    "✓ Deployment complete, index owned by admin"
                );
                Ok(Deployment {
                    chain_id,
                    sender,
                    addresses,
                    registry: registered.entries,
                    owner: addresses.admin,
                    gas,
                    trail,
                })
            }
            Err(PhaseError { phase, error }) => {
                tracing::error!(
                    step = phase.number(),
                    %phase,
                    last_confirmed = ?trail.last_confirmed,
                    error = %error,
                    "Deployment aborted"
                );
                Err(DeploymentFailure {
                    failed_phase: phase,
                    error,
                    trail,
                })
            }
        }
    }

    async fn run(
        &self,
        trail: &mut Trail,
    ) -> Result<(u64, Address, AddressBook, Registered), PhaseError> {
        let (chain_id, sender) = self.preflight(trail).await.at(Phase::Preflight)?;
        trail.complete(Phase::Preflight);

        // 1-2: the index, which every other contract depends on.
        let index_pending = self
            .submit_deployment(trail, Phase::DeployIndex, sender, Contract::Index, &[])
            .await
            .at(Phase::DeployIndex)?;
        trail.complete(Phase::DeployIndex);

        let index = self
            .confirm_deployment(trail, Phase::ConfirmIndex, index_pending)
            .await
            .at(Phase::ConfirmIndex)?;
        trail.complete(Phase::ConfirmIndex);

        // 3: everything that only needs the index.
        let mut barrier = Barrier::new();
        for contract in INDEX_DEPENDENTS {
            match self
                .submit_deployment(trail, Phase::DeployDependents, sender, contract, &[index])
                .await
            {
                Ok(pending) => barrier.push(pending),
                Err(error) => {
                    // Settle what was already submitted so the trail shows it.
                    let _ = self.settle(trail, Phase::DeployDependents, barrier).await;
                    return Err(PhaseError {
                        phase: Phase::DeployDependents,
                        error,
                    });
                }
            }
        }
        trail.complete(Phase::DeployDependents);

        // 4: the admin, needed by the registry storage.
        let admin_pending = barrier
            .take(Contract::Admin)
            .ok_or_else(|| DeployError::Deployment {
                contract: Contract::Admin,
                reason: "no pending deployment".to_string(),
            })
            .at(Phase::ConfirmAdmin)?;
        let admin = match self
            .confirm_deployment(trail, Phase::ConfirmAdmin, admin_pending)
            .await
        {
            Ok(admin) => admin,
            Err(error) => {
                let _ = self.settle(trail, Phase::ConfirmAdmin, barrier).await;
                return Err(PhaseError {
                    phase: Phase::ConfirmAdmin,
                    error,
                });
            }
        };
        trail.complete(Phase::ConfirmAdmin);

        // 5: the only deployment depending on two addresses.
        match self
            .submit_deployment(
                trail,
                Phase::DeployRegistryStorage,
                sender,
                Contract::RegistryStorage,
                &[index, admin],
            )
            .await
        {
            Ok(pending) => barrier.push(pending),
            Err(error) => {
                let _ = self.settle(trail, Phase::DeployRegistryStorage, barrier).await;
                return Err(PhaseError {
                    phase: Phase::DeployRegistryStorage,
                    error,
                });
            }
        }
        trail.complete(Phase::DeployRegistryStorage);

        // 6: nothing is wired until every address is known.
        let resolved = self
            .settle(trail, Phase::ConfirmAll, barrier)
            .await
            .at(Phase::ConfirmAll)?;
        let addresses = address_book(index, admin, &resolved).at(Phase::ConfirmAll)?;
        trail.complete(Phase::ConfirmAll);

        // 7-8: wiring, then the hand-off.
        let registered = self
            .register_roles(trail, sender, &addresses)
            .await
            .at(Phase::RegisterRoles)?;
        trail.complete(Phase::RegisterRoles);

        self.transfer_ownership(trail, sender, &addresses, &registered)
            .await
            .at(Phase::TransferOwnership)?;
        trail.complete(Phase::TransferOwnership);

        Ok((chain_id, sender, addresses, registered))
    }

    /// Check the network identity and resolve the sending account.
    ///
    /// The configured id is compared with the node's network id, not its
    /// chain id; the chain id is only recorded.
    async fn preflight(&self, trail: &mut Trail) -> Result<(u64, Address), DeployError> {
        let network_id = self
            .env
            .network_id()
            .await
            .map_err(|e| DeployError::environment("querying the network id", e))?;

        if !self.settings.network_id.matches(network_id) {
            let error = DeployError::NetworkMismatch {
                expected: self.settings.network_id.to_string(),
                actual: network_id,
            };
            trail.record(
                Phase::Preflight,
                Operation::CheckNetwork,
                Outcome::Failed {
                    reason: error.to_string(),
                },
            );
            return Err(error);
        }

        let chain_id = self
            .env
            .chain_id()
            .await
            .map_err(|e| DeployError::environment("querying the chain id", e))?;

        let sender = match self.settings.from {
            Some(from) => from,
            None => self
                .env
                .accounts()
                .await
                .map_err(|e| DeployError::environment("listing accounts", e))?
                .into_iter()
                .next()
                .ok_or_else(|| DeployError::Environment {
                    operation: "listing accounts".to_string(),
                    reason: "the node exposes no account to send from".to_string(),
                })?,
        };

        trail.record(
            Phase::Preflight,
            Operation::CheckNetwork,
            Outcome::Confirmed {
                tx_hash: None,
                address: Some(sender),
                gas_used: None,
            },
        );
        tracing::info!(
            network_id,
            chain_id,
            %sender,
            expected = %self.settings.network_id,
            "Network checked"
        );

        Ok((chain_id, sender))
    }

    async fn submit_deployment(
        &self,
        trail: &mut Trail,
        phase: Phase,
        sender: Address,
        contract: Contract,
        args: &[Address],
    ) -> Result<PendingDeployment, DeployError> {
        let data = abi::encode_deployment(self.artifacts.bytecode(contract), args);
        let request = TransactionRequest::deployment(sender, data, self.settings.gas);

        tracing::info!(%contract, args = ?args, "Deploying contract");

        match self.env.submit(request).await {
            Ok(tx_hash) => {
                trail.record(phase, Operation::Deploy(contract), Outcome::Submitted { tx_hash });
                Ok(PendingDeployment { contract, tx_hash })
            }
            Err(e) => {
                let error = DeployError::Deployment {
                    contract,
                    reason: format!("{e:#}"),
                };
                trail.record(
                    phase,
                    Operation::Deploy(contract),
                    Outcome::Failed {
                        reason: error.to_string(),
                    },
                );
                Err(error)
            }
        }
    }

    async fn confirm_deployment(
        &self,
        trail: &mut Trail,
        phase: Phase,
        pending: PendingDeployment,
    ) -> Result<Address, DeployError> {
        let result = pending.confirm(&self.env, self.settings.timing).await;
        record_settled(trail, phase, &pending, &result);
        result.map(|confirmed| confirmed.address)
    }

    /// Wait on the barrier and record every outcome.
    ///
    /// Returns the resolved addresses, or the first failure in submission order.
    async fn settle(
        &self,
        trail: &mut Trail,
        phase: Phase,
        barrier: Barrier,
    ) -> Result<BTreeMap<Contract, Address>, DeployError> {
        let mut resolved = BTreeMap::new();
        let mut first_error = None;

        for settled in barrier.wait(&self.env, self.settings.timing).await {
            record_settled(trail, phase, &settled.pending, &settled.result);
            match settled.result {
                Ok(confirmed) => {
                    resolved.insert(settled.pending.contract, confirmed.address);
                }
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(resolved),
        }
    }

    /// Submit a call against the index and wait for it to confirm.
    async fn call_index(
        &self,
        trail: &mut Trail,
        phase: Phase,
        operation: Operation,
        sender: Address,
        index: Address,
        data: Bytes,
    ) -> Result<B256, DeployError> {
        let call = operation.to_string();
        let fail = |trail: &mut Trail, reason: String| {
            trail.record(phase, operation, Outcome::Failed { reason: reason.clone() });
            DeployError::Call {
                call: call.clone(),
                reason,
            }
        };

        let request = TransactionRequest::call(sender, index, data, self.settings.gas);
        let tx_hash = match self.env.submit(request).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return Err(fail(trail, format!("rejected: {e:#}"))),
        };
        trail.record(phase, operation, Outcome::Submitted { tx_hash });

        let confirmation = wait_for_receipt(&self.env, &call, tx_hash, self.settings.timing);
        let receipt = match confirmation.await {
            Ok(receipt) => receipt,
            Err(error) => {
                trail.record(
                    phase,
                    operation,
                    Outcome::Failed {
                        reason: error.to_string(),
                    },
                );
                return Err(error);
            }
        };

        if !receipt.success {
            return Err(fail(trail, format!("reverted in transaction {tx_hash}")));
        }

        trail.record(
            phase,
            operation,
            Outcome::Confirmed {
                tx_hash: Some(tx_hash),
                address: None,
                gas_used: Some(receipt.gas_used),
            },
        );
        Ok(tx_hash)
    }

    async fn register_roles(
        &self,
        trail: &mut Trail,
        sender: Address,
        addresses: &AddressBook,
    ) -> Result<Registered, DeployError> {
        let mut entries = BTreeMap::new();

        for role in Role::ALL {
            let address = addresses.role(role);
            tracing::info!(key = role.key(), %address, "Registering role in index");

            self.call_index(
                trail,
                Phase::RegisterRoles,
                Operation::UpdateContract(role),
                sender,
                addresses.index,
                abi::encode_update_contract(role.key(), address),
            )
            .await?;
            entries.insert(role, address);
        }

        Ok(Registered { entries })
    }

    async fn transfer_ownership(
        &self,
        trail: &mut Trail,
        sender: Address,
        addresses: &AddressBook,
        registered: &Registered,
    ) -> Result<(), DeployError> {
        tracing::info!(
            index = %addresses.index,
            new_owner = %addresses.admin,
            roles = registered.entries.len(),
            "Transferring index ownership to admin"
        );

        self.call_index(
            trail,
            Phase::TransferOwnership,
            Operation::TransferOwnership,
            sender,
            addresses.index,
            abi::encode_transfer_ownership(addresses.admin),
        )
        .await?;
        Ok(())
    }
}

fn record_settled(
    trail: &mut Trail,
    phase: Phase,
    pending: &PendingDeployment,
    result: &Result<ConfirmedDeployment, DeployError>,
) {
    let outcome = match result {
        Ok(confirmed) => Outcome::Confirmed {
            tx_hash: Some(pending.tx_hash),
            address: Some(confirmed.address),
            gas_used: Some(confirmed.gas_used),
        },
        Err(error) => Outcome::Failed {
            reason: error.to_string(),
        },
    };
    trail.record(phase, Operation::Deploy(pending.contract), outcome);
}

fn address_book(
    index: Address,
    admin: Address,
    resolved: &BTreeMap<Contract, Address>,
) -> Result<AddressBook, DeployError> {
    let get = |contract: Contract| {
        resolved
            .get(&contract)
            .copied()
            .ok_or_else(|| DeployError::Deployment {
                contract,
                reason: "address was never resolved".to_string(),
            })
    };

    Ok(AddressBook {
        index,
        admin,
        registry: get(Contract::Registry)?,
        registry_storage: get(Contract::RegistryStorage)?,
        token: get(Contract::Token)?,
        token_storage: get(Contract::TokenStorage)?,
        loan: get(Contract::Loan)?,
        loan_storage: get(Contract::LoanStorage)?,
    })
}
