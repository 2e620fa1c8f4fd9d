//! Error taxonomy for a deployment run.

use std::{fmt, time::Duration};

use alloy_core::primitives::B256;
use thiserror::Error;

use crate::contracts::Contract;

/// Errors that abort a deployment run.
///
/// Every variant is fatal for the run it occurs in: nothing is retried and no
/// later step is issued once one of these has been observed.
#[derive(Error, Debug)]
pub enum DeployError {
    /// The environment rejected a contract creation.
    #[error("Deployment of {contract} rejected: {reason}")]
    Deployment { contract: Contract, reason: String },

    /// A contract creation was mined but reverted.
    #[error("Deployment of {contract} reverted in transaction {tx_hash}")]
    Reverted { contract: Contract, tx_hash: B256 },

    /// No confirmation arrived within the configured window.
    #[error(
        "{operation} not confirmed within {}s (transaction {tx_hash}){last_error}",
        .timeout.as_secs()
    )]
    ConfirmationTimeout {
        operation: String,
        tx_hash: B256,
        timeout: Duration,
        last_error: LastQueryError,
    },

    /// A wiring or ownership-transfer call was rejected or reverted.
    #[error("Call {call} failed: {reason}")]
    Call { call: String, reason: String },

    /// The environment reports a different network than the one configured.
    #[error("Connected to network {actual}, but the configuration expects network {expected}")]
    NetworkMismatch { expected: String, actual: u64 },

    /// The environment could not be queried.
    #[error("Execution environment error while {operation}: {reason}")]
    Environment { operation: String, reason: String },
}

impl DeployError {
    pub(crate) fn environment(operation: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Environment {
            operation: operation.into(),
            reason: format!("{err:#}"),
        }
    }
}

/// The last receipt query failure seen before a confirmation timed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastQueryError(pub Option<String>);

impl fmt::Display for LastQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(error) => write!(f, ", last receipt query failed: {error}"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_names_last_query_error() {
        let timeout = |last_error| DeployError::ConfirmationTimeout {
            operation: "Deployment of Index".to_string(),
            tx_hash: B256::ZERO,
            timeout: Duration::from_secs(120),
            last_error,
        };

        let pending = timeout(LastQueryError(None)).to_string();
        assert!(pending.starts_with("Deployment of Index not confirmed within 120s"));
        assert!(pending.ends_with(')'));

        let failing = timeout(LastQueryError(Some("connection refused".to_string())));
        assert!(failing.to_string().ends_with("last receipt query failed: connection refused"));
    }
}
