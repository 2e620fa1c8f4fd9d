//! Step trail of a deployment run, and its success and failure reports.

use std::collections::BTreeMap;
use std::fmt;

use alloy_core::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    contracts::{Contract, Role},
    error::DeployError,
};

/// The numbered phases of a run, in the only order they may happen.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    /// Network identity and sender resolution, before any transaction.
    Preflight,
    DeployIndex,
    ConfirmIndex,
    DeployDependents,
    ConfirmAdmin,
    DeployRegistryStorage,
    ConfirmAll,
    RegisterRoles,
    TransferOwnership,
}

impl Phase {
    /// Step number, `0` for the preflight.
    pub fn number(self) -> u8 {
        self as u8
    }
}

/// What a trail entry acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "target")]
pub enum Operation {
    CheckNetwork,
    Deploy(Contract),
    UpdateContract(Role),
    TransferOwnership,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CheckNetwork => write!(f, "check network"),
            Operation::Deploy(contract) => write!(f, "deploy {contract}"),
            Operation::UpdateContract(role) => write!(f, "updateContract('{}')", role.key()),
            Operation::TransferOwnership => write!(f, "transferOwnership"),
        }
    }
}

/// Outcome recorded for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum Outcome {
    Submitted {
        tx_hash: B256,
    },
    Confirmed {
        #[serde(skip_serializing_if = "Option::is_none")]
        tx_hash: Option<B256>,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<Address>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gas_used: Option<u64>,
    },
    Failed {
        reason: String,
    },
}

/// One entry of the diagnostic trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub phase: Phase,
    pub operation: Operation,
    pub outcome: Outcome,
}

/// Ordered record of everything a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trail {
    pub records: Vec<StepRecord>,
    /// The latest phase whose every operation confirmed.
    pub last_confirmed: Option<Phase>,
}

impl Trail {
    pub(crate) fn record(&mut self, phase: Phase, operation: Operation, outcome: Outcome) {
        match &outcome {
            Outcome::Failed { reason } => {
                tracing::error!(%phase, %operation, %reason, "Step failed");
            }
            Outcome::Submitted { tx_hash } => {
                tracing::debug!(%phase, %operation, %tx_hash, "Step submitted");
            }
            Outcome::Confirmed { .. } => {
                tracing::debug!(%phase, %operation, "Step confirmed");
            }
        }
        self.records.push(StepRecord {
            phase,
            operation,
            outcome,
        });
    }

    pub(crate) fn complete(&mut self, phase: Phase) {
        tracing::info!(step = phase.number(), %phase, "Phase complete");
        self.last_confirmed = Some(phase);
    }

    /// Operations that reached confirmation.
    pub fn confirmed(&self) -> impl Iterator<Item = &StepRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Confirmed { .. }))
    }

    /// Gas used by every confirmed transaction.
    pub fn gas_used(&self) -> u64 {
        self.confirmed()
            .filter_map(|r| match r.outcome {
                Outcome::Confirmed { gas_used, .. } => gas_used,
                _ => None,
            })
            .sum()
    }
}

const GWEI_PER_ETH: u128 = 1_000_000_000;

/// Gas spent by a run, priced when a gas price is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasReport {
    pub gas_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price_gwei: Option<u64>,
}

impl GasReport {
    pub fn new(trail: &Trail, gas_price_gwei: Option<u64>) -> Self {
        Self {
            gas_used: trail.gas_used(),
            gas_price_gwei,
        }
    }

    pub fn cost_gwei(&self) -> Option<u128> {
        self.gas_price_gwei
            .map(|price| u128::from(self.gas_used) * u128::from(price))
    }

    /// Cost in ether with nine decimals, e.g. `0.004512345 ETH`.
    pub fn cost_eth(&self) -> Option<String> {
        self.cost_gwei().map(|gwei| {
            format!("{}.{:09} ETH", gwei / GWEI_PER_ETH, gwei % GWEI_PER_ETH)
        })
    }
}

/// The eight deployed addresses, available only once every deployment confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBook {
    pub index: Address,
    pub admin: Address,
    pub registry: Address,
    pub registry_storage: Address,
    pub token: Address,
    pub token_storage: Address,
    pub loan: Address,
    pub loan_storage: Address,
}

impl AddressBook {
    /// Address of a contract.
    pub fn get(&self, contract: Contract) -> Address {
        match contract {
            Contract::Index => self.index,
            Contract::Admin => self.admin,
            Contract::Registry => self.registry,
            Contract::RegistryStorage => self.registry_storage,
            Contract::Token => self.token,
            Contract::TokenStorage => self.token_storage,
            Contract::Loan => self.loan,
            Contract::LoanStorage => self.loan_storage,
        }
    }

    /// Address registered for a role.
    pub fn role(&self, role: Role) -> Address {
        self.get(role.contract())
    }

    /// All contracts with their addresses.
    pub fn contracts(&self) -> BTreeMap<Contract, Address> {
        Contract::ALL.into_iter().map(|c| (c, self.get(c))).collect()
    }
}

/// Report of a run where every step confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub chain_id: u64,
    pub sender: Address,
    pub addresses: AddressBook,
    /// Role entries confirmed in the index.
    pub registry: BTreeMap<Role, Address>,
    /// Owner of the index after the run: the admin contract.
    pub owner: Address,
    pub gas: GasReport,
    pub trail: Trail,
}

/// Report of a run that stopped at a failing step.
///
/// Ownership of the index is never transferred in a failed run, so the sender
/// still owns it and can finish or redo the wiring by hand.
#[derive(Error, Debug)]
#[error("Deployment failed at step {} ({failed_phase}): {error}", .failed_phase.number())]
pub struct DeploymentFailure {
    pub failed_phase: Phase,
    pub error: DeployError,
    pub trail: Trail,
}

impl DeploymentFailure {
    /// The last phase that fully confirmed before the failure.
    pub fn last_confirmed(&self) -> Option<Phase> {
        self.trail.last_confirmed
    }

    /// Contracts whose deployment confirmed, with their addresses.
    pub fn deployed(&self) -> BTreeMap<Contract, Address> {
        self.trail
            .confirmed()
            .filter_map(|r| match (r.operation, &r.outcome) {
                (Operation::Deploy(contract), Outcome::Confirmed { address: Some(a), .. }) => {
                    Some((contract, *a))
                }
                _ => None,
            })
            .collect()
    }

    /// Roles whose registration confirmed before the failure.
    pub fn registered(&self) -> Vec<Role> {
        self.trail
            .confirmed()
            .filter_map(|r| match r.operation {
                Operation::UpdateContract(role) => Some(role),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_numbers_follow_order() {
        assert_eq!(Phase::Preflight.number(), 0);
        assert_eq!(Phase::DeployIndex.number(), 1);
        assert_eq!(Phase::RegisterRoles.number(), 7);
        assert_eq!(Phase::TransferOwnership.number(), 8);
        assert!(Phase::ConfirmAdmin < Phase::DeployRegistryStorage);
        assert_eq!(Phase::ConfirmAll.to_string(), "confirm-all");
    }

    #[test]
    fn test_failure_summarises_trail() {
        let mut trail = Trail::default();
        let index = Address::repeat_byte(0x10);
        trail.record(
            Phase::ConfirmIndex,
            Operation::Deploy(Contract::Index),
            Outcome::Confirmed {
                tx_hash: Some(B256::repeat_byte(1)),
                address: Some(index),
                gas_used: Some(250_000),
            },
        );
        trail.complete(Phase::ConfirmIndex);
        trail.record(
            Phase::DeployDependents,
            Operation::Deploy(Contract::Loan),
            Outcome::Failed {
                reason: "rejected".to_string(),
            },
        );

        let failure = DeploymentFailure {
            failed_phase: Phase::DeployDependents,
            error: DeployError::Deployment {
                contract: Contract::Loan,
                reason: "rejected".to_string(),
            },
            trail,
        };

        assert_eq!(failure.last_confirmed(), Some(Phase::ConfirmIndex));
        assert_eq!(failure.deployed().get(&Contract::Index), Some(&index));
        assert!(failure.registered().is_empty());
        assert_eq!(failure.trail.gas_used(), 250_000);
        assert!(failure.to_string().starts_with("Deployment failed at step 3 (deploy-dependents)"));
    }

    #[test]
    fn test_gas_report_totals_and_prices() {
        let mut trail = Trail::default();
        trail.record(
            Phase::Preflight,
            Operation::CheckNetwork,
            Outcome::Confirmed {
                tx_hash: None,
                address: Some(Address::repeat_byte(1)),
                gas_used: None,
            },
        );
        for (role, gas_used) in [(Role::Token, 50_000), (Role::Loan, 64_000)] {
            trail.record(
                Phase::RegisterRoles,
                Operation::UpdateContract(role),
                Outcome::Confirmed {
                    tx_hash: Some(B256::repeat_byte(2)),
                    address: None,
                    gas_used: Some(gas_used),
                },
            );
        }
        trail.record(
            Phase::TransferOwnership,
            Operation::TransferOwnership,
            Outcome::Failed {
                reason: "rejected".to_string(),
            },
        );

        let unpriced = GasReport::new(&trail, None);
        assert_eq!(unpriced.gas_used, 114_000);
        assert_eq!(unpriced.cost_eth(), None);

        let priced = GasReport::new(&trail, Some(21));
        assert_eq!(priced.cost_gwei(), Some(2_394_000));
        assert_eq!(priced.cost_eth().unwrap(), "0.002394000 ETH");
    }

    #[test]
    fn test_operation_serialization() {
        let json = serde_json::to_value(Operation::UpdateContract(Role::TokenStorage)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "update-contract", "target": "tokenS"}));
        assert_eq!(Operation::UpdateContract(Role::Loan).to_string(), "updateContract('loan')");
    }
}
