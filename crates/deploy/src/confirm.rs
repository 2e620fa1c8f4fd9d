//! Confirmation of submitted transactions, and the join barrier over pending deployments.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use futures::future::join_all;

use crate::{
    contracts::Contract,
    env::{ExecutionEnvironment, Receipt},
    error::{DeployError, LastQueryError},
};

/// How long to wait for a confirmation, and how often to poll for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationTiming {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmationTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Poll for the receipt of `tx_hash` until it arrives or `timing.timeout` elapses.
///
/// Query failures while polling are logged and polled again; only the timeout
/// ends the wait. A timeout is returned as [`DeployError::ConfirmationTimeout`]
/// carrying the last query failure, and is never retried.
pub async fn wait_for_receipt<E: ExecutionEnvironment>(
    env: &E,
    operation: &str,
    tx_hash: B256,
    timing: ConfirmationTiming,
) -> Result<Receipt, DeployError> {
    let mut last_error = None;
    let poll = async {
        loop {
            match env.receipt(tx_hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => {
                    tracing::trace!(%tx_hash, operation, "Transaction pending");
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        %tx_hash,
                        operation,
                        "Receipt query failed, retrying..."
                    );
                    last_error = Some(format!("{e:#}"));
                }
            }
            tokio::time::sleep(timing.poll_interval).await;
        }
    };

    let outcome = tokio::time::timeout(timing.timeout, poll).await;
    outcome.map_err(|_| DeployError::ConfirmationTimeout {
        operation: operation.to_string(),
        tx_hash,
        timeout: timing.timeout,
        last_error: LastQueryError(last_error),
    })
}

/// A submitted contract creation awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDeployment {
    pub contract: Contract,
    pub tx_hash: B256,
}

/// A confirmed contract creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedDeployment {
    pub address: Address,
    pub gas_used: u64,
}

impl PendingDeployment {
    /// Wait for this deployment to confirm and return the assigned address.
    pub async fn confirm<E: ExecutionEnvironment>(
        &self,
        env: &E,
        timing: ConfirmationTiming,
    ) -> Result<ConfirmedDeployment, DeployError> {
        let operation = format!("Deployment of {}", self.contract);
        let receipt = wait_for_receipt(env, &operation, self.tx_hash, timing).await?;

        if !receipt.success {
            return Err(DeployError::Reverted {
                contract: self.contract,
                tx_hash: self.tx_hash,
            });
        }

        let address = receipt
            .contract_address
            .ok_or_else(|| DeployError::Deployment {
                contract: self.contract,
                reason: "receipt carries no contract address".to_string(),
            })?;

        tracing::info!(
            contract = %self.contract,
            %address,
            tx_hash = %self.tx_hash,
            gas_used = receipt.gas_used,
            "Deployment confirmed"
        );
        Ok(ConfirmedDeployment {
            address,
            gas_used: receipt.gas_used,
        })
    }
}

/// Outcome of one deployment waited on by a [`Barrier`].
#[derive(Debug)]
pub struct Settled {
    pub pending: PendingDeployment,
    pub result: Result<ConfirmedDeployment, DeployError>,
}

/// Join point over a set of pending deployments.
///
/// Waiting on the barrier resolves only once every member has settled, either
/// confirmed or failed. Nothing that depends on a member may be issued before.
#[derive(Debug, Default)]
pub struct Barrier {
    pending: Vec<PendingDeployment>,
}

impl Barrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pending: PendingDeployment) {
        self.pending.push(pending);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take a member out of the barrier so it can be awaited on its own.
    pub fn take(&mut self, contract: Contract) -> Option<PendingDeployment> {
        let position = self.pending.iter().position(|p| p.contract == contract)?;
        Some(self.pending.remove(position))
    }

    /// Wait for every member, returning outcomes in submission order.
    pub async fn wait<E: ExecutionEnvironment>(
        self,
        env: &E,
        timing: ConfirmationTiming,
    ) -> Vec<Settled> {
        tracing::debug!(members = self.pending.len(), "Waiting on deployment barrier");

        join_all(self.pending.into_iter().map(|pending| async move {
            let result = pending.confirm(env, timing).await;
            Settled { pending, result }
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        contracts::ArtifactStore,
        env::TransactionRequest,
        memory::{Fault, MemoryEnvironment},
    };

    fn fast() -> ConfirmationTiming {
        ConfirmationTiming {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
        }
    }

    async fn submit(
        env: &MemoryEnvironment,
        artifacts: &ArtifactStore,
        contract: Contract,
    ) -> PendingDeployment {
        let code = artifacts.bytecode(contract).clone();
        let request = TransactionRequest::deployment(env.default_account(), code, 1_000_000);
        let tx_hash = env.submit(request).await.unwrap();
        PendingDeployment { contract, tx_hash }
    }

    #[tokio::test]
    async fn test_barrier_waits_for_all_members() {
        let artifacts = ArtifactStore::placeholder();
        let env = MemoryEnvironment::new(2018, &artifacts).confirm_after_polls(3);

        let mut barrier = Barrier::new();
        for contract in [Contract::Index, Contract::Token, Contract::Loan] {
            barrier.push(submit(&env, &artifacts, contract).await);
        }

        let settled = barrier.wait(&env, fast()).await;
        assert_eq!(settled.len(), 3);
        assert_eq!(settled[1].pending.contract, Contract::Token);
        assert!(settled.iter().all(|s| s.result.is_ok()));
    }

    #[tokio::test]
    async fn test_barrier_reports_each_failure() {
        let artifacts = ArtifactStore::placeholder();
        let env = MemoryEnvironment::new(2018, &artifacts)
            .with_fault(Fault::RevertDeployment(Contract::Loan));

        let mut barrier = Barrier::new();
        barrier.push(submit(&env, &artifacts, Contract::Token).await);
        barrier.push(submit(&env, &artifacts, Contract::Loan).await);

        let settled = barrier.wait(&env, fast()).await;
        assert!(settled[0].result.is_ok());
        assert!(matches!(
            settled[1].result,
            Err(DeployError::Reverted { contract: Contract::Loan, .. })
        ));
    }

    #[tokio::test]
    async fn test_stalled_deployment_times_out() {
        let artifacts = ArtifactStore::placeholder();
        let env = MemoryEnvironment::new(2018, &artifacts)
            .with_fault(Fault::StallDeployment(Contract::Admin));

        let pending = submit(&env, &artifacts, Contract::Admin).await;
        let err = pending.confirm(&env, fast()).await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::ConfirmationTimeout { last_error: LastQueryError(None), .. }
        ));
    }

    #[tokio::test]
    async fn test_timeout_reports_failing_receipt_query() {
        let artifacts = ArtifactStore::placeholder();
        let env = MemoryEnvironment::new(2018, &artifacts);

        // Never submitted, so every receipt query fails.
        let err = wait_for_receipt(&env, "Deployment of Token", B256::repeat_byte(0x77), fast())
            .await
            .unwrap_err();

        let DeployError::ConfirmationTimeout { last_error, .. } = &err else {
            panic!("expected a timeout, got {err}");
        };
        assert!(last_error.0.as_deref().unwrap().contains("unknown transaction"));
        assert!(err.to_string().contains("last receipt query failed: unknown transaction"));
    }

    #[tokio::test]
    async fn test_take_removes_member() {
        let artifacts = ArtifactStore::placeholder();
        let env = MemoryEnvironment::new(2018, &artifacts);

        let mut barrier = Barrier::new();
        barrier.push(submit(&env, &artifacts, Contract::Admin).await);
        barrier.push(submit(&env, &artifacts, Contract::Token).await);

        let admin = barrier.take(Contract::Admin).unwrap();
        assert_eq!(admin.contract, Contract::Admin);
        assert_eq!(barrier.len(), 1);
        assert!(barrier.take(Contract::Admin).is_none());
    }
}
