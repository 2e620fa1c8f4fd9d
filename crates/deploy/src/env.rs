//! The seam between the orchestrator and the chain it deploys to.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A transaction submitted to the execution environment.
///
/// A request without a recipient is a contract creation whose `data` is the
/// creation bytecode followed by the encoded constructor arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    pub data: Bytes,
    pub gas: u64,
}

impl TransactionRequest {
    /// A contract creation.
    pub fn deployment(from: Address, data: Bytes, gas: u64) -> Self {
        Self {
            from,
            to: None,
            data,
            gas,
        }
    }

    /// A call against a deployed contract.
    pub fn call(from: Address, to: Address, data: Bytes, gas: u64) -> Self {
        Self {
            from,
            to: Some(to),
            data,
            gas,
        }
    }
}

/// The environment's acknowledgment that a transaction was mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: B256,
    /// Whether execution succeeded.
    pub success: bool,
    /// Address assigned to a created contract.
    pub contract_address: Option<Address>,
    /// Gas consumed by the transaction, charged on revert as well.
    pub gas_used: u64,
}

/// An execution environment accepting deployments and calls.
///
/// Submissions return as soon as the environment accepted the transaction;
/// confirmation is observed separately by polling [`receipt`](Self::receipt).
pub trait ExecutionEnvironment: Send + Sync {
    /// Network id of the connected network (`net_version`), checked
    /// against the configured `network_id`.
    fn network_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Chain id of the connected network (`eth_chainId`). Development
    /// nodes usually report a chain id that differs from their network id.
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Accounts the environment can send from. The first one is used when no
    /// sender is configured.
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>>> + Send;

    /// Submit a transaction. An error means the environment rejected it.
    fn submit(&self, request: TransactionRequest) -> impl Future<Output = Result<B256>> + Send;

    /// Receipt of a submitted transaction, or `None` while still pending.
    fn receipt(&self, tx_hash: B256) -> impl Future<Output = Result<Option<Receipt>>> + Send;
}
