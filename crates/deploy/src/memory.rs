//! In-memory execution environment.
//!
//! Simulates just enough of a chain to exercise a full deployment run without
//! a node: deterministic address assignment, the index's registry and
//! ownership, delayed confirmations and injected failures. Used by
//! `indexup deploy --dry-run` and by the test suites.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use alloy_core::primitives::{Address, B256, Bytes, keccak256};
use anyhow::Result;

use crate::{
    abi::{self, IndexCall},
    contracts::{ArtifactStore, Contract},
    env::{ExecutionEnvironment, Receipt, TransactionRequest},
};

/// A failure to inject into the environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Submissions creating this contract are rejected outright.
    RejectDeployment(Contract),
    /// Creations of this contract are mined with a failed status.
    RevertDeployment(Contract),
    /// Creations of this contract never confirm.
    StallDeployment(Contract),
    /// `updateContract` calls for this key are mined with a failed status.
    RevertRegistration(String),
    /// `transferOwnership` submissions are rejected outright.
    RejectOwnershipTransfer,
}

/// Something observable that happened on the simulated chain, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A contract creation was accepted.
    DeploymentSubmitted {
        contract: Option<Contract>,
        tx_hash: B256,
        args: Vec<Address>,
    },
    /// A call was accepted.
    CallSubmitted { to: Address, tx_hash: B256 },
    /// A receipt was handed out for the first time.
    Confirmed {
        tx_hash: B256,
        success: bool,
        gas_used: u64,
    },
    /// The index stored a role address.
    ContractUpdated { key: String, address: Address },
    /// The index changed owner.
    OwnershipTransferred { previous: Address, new_owner: Address },
}

#[derive(Debug)]
struct DeployedContract {
    contract: Option<Contract>,
    owner: Address,
    registry: BTreeMap<String, Address>,
}

#[derive(Debug)]
struct PendingTransaction {
    receipt: Receipt,
    polls_left: u32,
    stalled: bool,
    observed: bool,
}

#[derive(Debug, Default)]
struct ChainState {
    nonces: HashMap<Address, u64>,
    contracts: HashMap<Address, DeployedContract>,
    transactions: HashMap<B256, PendingTransaction>,
    events: Vec<ChainEvent>,
}

/// A simulated chain.
#[derive(Debug)]
pub struct MemoryEnvironment {
    chain_id: u64,
    network_id: u64,
    accounts: Vec<Address>,
    confirm_after_polls: u32,
    /// Known creation bytecode, longest first.
    codes: Vec<(Contract, Bytes)>,
    faults: HashSet<Fault>,
    state: Mutex<ChainState>,
}

impl MemoryEnvironment {
    /// Create an environment that recognises the contracts of `artifacts`.
    ///
    /// Its network id equals `chain_id` unless set with [`Self::with_network_id`].
    pub fn new(chain_id: u64, artifacts: &ArtifactStore) -> Self {
        let mut codes: Vec<(Contract, Bytes)> = artifacts
            .iter()
            .map(|(contract, code)| (contract, code.clone()))
            .collect();
        codes.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        let accounts = (1u8..=3).map(Address::repeat_byte).collect();

        Self {
            chain_id,
            network_id: chain_id,
            accounts,
            confirm_after_polls: 0,
            codes,
            faults: HashSet::new(),
            state: Mutex::new(ChainState::default()),
        }
    }

    pub fn with_network_id(mut self, network_id: u64) -> Self {
        self.network_id = network_id;
        self
    }

    /// Gas charged for a transaction: 21000 intrinsic, 16 per calldata byte,
    /// and 32000 more for a contract creation.
    pub fn gas_cost(request: &TransactionRequest) -> u64 {
        let creation = if request.to.is_none() { 32_000 } else { 0 };
        21_000 + 16 * request.data.len() as u64 + creation
    }

    /// Number of pending receipt queries before a transaction confirms.
    pub fn confirm_after_polls(mut self, polls: u32) -> Self {
        self.confirm_after_polls = polls;
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.insert(fault);
        self
    }

    /// The account used when no sender is configured.
    pub fn default_account(&self) -> Address {
        self.accounts[0]
    }

    /// Everything that happened so far, in order.
    pub fn events(&self) -> Vec<ChainEvent> {
        self.state().events.clone()
    }

    /// Current registry entries of the contract at `index`.
    pub fn registry(&self, index: Address) -> BTreeMap<String, Address> {
        self.state()
            .contracts
            .get(&index)
            .map(|c| c.registry.clone())
            .unwrap_or_default()
    }

    /// Current owner of the contract at `address`.
    pub fn owner(&self, address: Address) -> Option<Address> {
        self.state().contracts.get(&address).map(|c| c.owner)
    }

    /// Which contract was deployed at `address`, if it was recognised.
    pub fn contract_at(&self, address: Address) -> Option<Contract> {
        self.state()
            .contracts
            .get(&address)
            .and_then(|c| c.contract)
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn identify(&self, data: &[u8]) -> Option<(Contract, Vec<Address>)> {
        self.codes.iter().find_map(|(contract, code)| {
            abi::decode_deployment_args(code, data).map(|args| (*contract, args))
        })
    }

    fn has_fault(&self, fault: &Fault) -> bool {
        self.faults.contains(fault)
    }

    fn deploy(
        &self,
        state: &mut ChainState,
        request: &TransactionRequest,
        tx_hash: B256,
    ) -> Result<Receipt> {
        let identified = self.identify(&request.data);
        let contract = identified.as_ref().map(|(contract, _)| *contract);

        if let Some(contract) = contract {
            if self.has_fault(&Fault::RejectDeployment(contract)) {
                anyhow::bail!("insufficient funds for gas * price + value");
            }
        }

        let nonce = state.nonces.entry(request.from).or_default();
        let mut preimage = request.from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        *nonce += 1;
        let address = Address::from_slice(&keccak256(&preimage)[12..]);

        let reverted = contract.is_some_and(|c| self.has_fault(&Fault::RevertDeployment(c)));

        state.events.push(ChainEvent::DeploymentSubmitted {
            contract,
            tx_hash,
            args: identified.map(|(_, args)| args).unwrap_or_default(),
        });

        if reverted {
            return Ok(Receipt {
                tx_hash,
                success: false,
                contract_address: None,
                gas_used: Self::gas_cost(request),
            });
        }

        state.contracts.insert(
            address,
            DeployedContract {
                contract,
                owner: request.from,
                registry: BTreeMap::new(),
            },
        );

        Ok(Receipt {
            tx_hash,
            success: true,
            contract_address: Some(address),
            gas_used: Self::gas_cost(request),
        })
    }

    fn call(
        &self,
        state: &mut ChainState,
        request: &TransactionRequest,
        to: Address,
        tx_hash: B256,
    ) -> Result<Receipt> {
        let decoded = abi::decode_index_call(&request.data);

        if matches!(decoded, Some(IndexCall::TransferOwnership { .. }))
            && self.has_fault(&Fault::RejectOwnershipTransfer)
        {
            anyhow::bail!("transaction underpriced");
        }

        *state.nonces.entry(request.from).or_default() += 1;
        state.events.push(ChainEvent::CallSubmitted { to, tx_hash });

        let success = match (state.contracts.get_mut(&to), decoded) {
            (Some(target), Some(call))
                if target.contract == Some(Contract::Index) && target.owner == request.from =>
            {
                match call {
                    IndexCall::UpdateContract { key, address } => {
                        if self.has_fault(&Fault::RevertRegistration(key.clone())) {
                            false
                        } else {
                            target.registry.insert(key.clone(), address);
                            state.events.push(ChainEvent::ContractUpdated { key, address });
                            true
                        }
                    }
                    IndexCall::TransferOwnership { new_owner } => {
                        let previous = std::mem::replace(&mut target.owner, new_owner);
                        state
                            .events
                            .push(ChainEvent::OwnershipTransferred { previous, new_owner });
                        true
                    }
                }
            }
            // Unknown target, unknown selector, or caller is not the owner.
            _ => false,
        };

        Ok(Receipt {
            tx_hash,
            success,
            contract_address: None,
            gas_used: Self::gas_cost(request),
        })
    }
}

impl ExecutionEnvironment for MemoryEnvironment {
    async fn network_id(&self) -> Result<u64> {
        Ok(self.network_id)
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.accounts.clone())
    }

    async fn submit(&self, request: TransactionRequest) -> Result<B256> {
        let mut state = self.state();

        let nonce = state.nonces.get(&request.from).copied().unwrap_or_default();
        let mut preimage = request.from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&request.data);
        let tx_hash = keccak256(&preimage);

        let (receipt, stalled) = match request.to {
            None => {
                let stalled = self
                    .identify(&request.data)
                    .is_some_and(|(c, _)| self.has_fault(&Fault::StallDeployment(c)));
                (self.deploy(&mut state, &request, tx_hash)?, stalled)
            }
            Some(to) => (self.call(&mut state, &request, to, tx_hash)?, false),
        };

        state.transactions.insert(
            tx_hash,
            PendingTransaction {
                receipt,
                polls_left: self.confirm_after_polls,
                stalled,
                observed: false,
            },
        );

        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>> {
        let mut state = self.state();

        let Some(pending) = state.transactions.get_mut(&tx_hash) else {
            anyhow::bail!("unknown transaction {tx_hash}");
        };

        if pending.stalled {
            return Ok(None);
        }
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return Ok(None);
        }

        let receipt = pending.receipt.clone();
        if !pending.observed {
            pending.observed = true;
            state.events.push(ChainEvent::Confirmed {
                tx_hash,
                success: receipt.success,
                gas_used: receipt.gas_used,
            });
        }

        Ok(Some(receipt))
    }
}
