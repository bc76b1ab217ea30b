//! Spending allowance for the relay contract (approve phase of a transfer)

use crate::chain::SourceChain;
use crate::contracts::approve_tx;
use crate::error::{ChainError, FailureReason, TransferError};

use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Allowance as read from the chain; never reused across attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowanceSnapshot {
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
}

impl AllowanceSnapshot {
    pub fn covers(&self, amount: U256) -> bool {
        self.amount >= amount
    }
}

pub struct AllowanceManager {
    chain: Arc<dyn SourceChain>,
    token: Address,
}

impl AllowanceManager {
    pub fn new(chain: Arc<dyn SourceChain>, token: Address) -> Self {
        Self { chain, token }
    }

    /// Fresh allowance read. Failures surface immediately.
    pub async fn snapshot(
        &self,
        owner: Address,
        spender: Address,
    ) -> Result<AllowanceSnapshot, TransferError> {
        let amount = self
            .chain
            .allowance(self.token, owner, spender)
            .await
            .map_err(|e| TransferError::SourceUnavailable(e.to_string()))?;

        Ok(AllowanceSnapshot {
            owner,
            spender,
            amount,
        })
    }

    /// Make sure `spender` may move `amount`.
    ///
    /// Returns the confirmed approval hash, or `None` when the current
    /// allowance already covers the amount and nothing was sent.
    pub async fn ensure_allowance(
        &self,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<Option<H256>, TransferError> {
        let snapshot = self.snapshot(owner, spender).await?;
        if snapshot.covers(amount) {
            debug!(
                "Allowance {} already covers {} for {:?}",
                snapshot.amount, amount, spender
            );
            return Ok(None);
        }

        info!(
            "Approving {} for {:?} (current allowance {})",
            amount, spender, snapshot.amount
        );

        let tx_hash = self
            .chain
            .sign_and_send(approve_tx(self.token, spender, amount))
            .await
            .map_err(|e| match e {
                ChainError::UserRejected => TransferError::ApprovalRejected,
                other => TransferError::ApprovalFailed(FailureReason::from(other)),
            })?;

        crate::metrics::record_tx_submitted("approval");

        self.chain
            .wait_for_confirmation(tx_hash)
            .await
            .map_err(|e| TransferError::ApprovalFailed(FailureReason::from(e)))?;

        info!("Approval {:?} confirmed", tx_hash);
        Ok(Some(tx_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockSourceChain, TxConfirmation};
    use crate::contracts::{ApproveCall, TxKind, TxSpec};
    use ethers::abi::AbiDecode;

    fn token() -> Address {
        Address::repeat_byte(0x1c)
    }

    fn reserve() -> Address {
        Address::repeat_byte(0x88)
    }

    fn owner() -> Address {
        Address::repeat_byte(0x01)
    }

    #[tokio::test]
    async fn test_sufficient_allowance_sends_nothing() {
        let mut chain = MockSourceChain::new();
        chain
            .expect_allowance()
            .returning(|_, _, _| Ok(U256::from(100u64)));
        chain.expect_sign_and_send().never();
        chain.expect_wait_for_confirmation().never();

        let manager = AllowanceManager::new(Arc::new(chain), token());
        let result = manager
            .ensure_allowance(owner(), reserve(), U256::from(100u64))
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_approves_exact_amount() {
        let approval = H256::repeat_byte(0xaa);
        let mut chain = MockSourceChain::new();
        chain.expect_allowance().returning(|_, _, _| Ok(U256::zero()));
        chain
            .expect_sign_and_send()
            .times(1)
            .withf(|tx: &TxSpec| {
                let call = ApproveCall::decode(tx.data.as_ref()).unwrap();
                tx.kind == TxKind::Approval
                    && tx.to == Address::repeat_byte(0x1c)
                    && call.spender == Address::repeat_byte(0x88)
                    && call.amount == U256::from(50_000_000u64)
            })
            .returning(move |_| Ok(approval));
        chain
            .expect_wait_for_confirmation()
            .times(1)
            .returning(|tx_hash| {
                Ok(TxConfirmation {
                    tx_hash,
                    block_number: 10,
                    confirmations: 1,
                })
            });

        let manager = AllowanceManager::new(Arc::new(chain), token());
        let result = manager
            .ensure_allowance(owner(), reserve(), U256::from(50_000_000u64))
            .await
            .unwrap();
        assert_eq!(result, Some(approval));
    }

    #[tokio::test]
    async fn test_user_rejection() {
        let mut chain = MockSourceChain::new();
        chain.expect_allowance().returning(|_, _, _| Ok(U256::zero()));
        chain
            .expect_sign_and_send()
            .returning(|_| Err(ChainError::UserRejected));
        chain.expect_wait_for_confirmation().never();

        let manager = AllowanceManager::new(Arc::new(chain), token());
        let err = manager
            .ensure_allowance(owner(), reserve(), U256::from(1u64))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::ApprovalRejected);
    }

    #[tokio::test]
    async fn test_read_failure_is_not_retried() {
        let mut chain = MockSourceChain::new();
        chain.expect_allowance().times(1).returning(|_, _, _| {
            Err(ChainError::Connection {
                chain_id: 11155111,
                message: "refused".into(),
            })
        });
        chain.expect_sign_and_send().never();

        let manager = AllowanceManager::new(Arc::new(chain), token());
        let err = manager
            .ensure_allowance(owner(), reserve(), U256::from(1u64))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_reverted_approval() {
        let mut chain = MockSourceChain::new();
        chain.expect_allowance().returning(|_, _, _| Ok(U256::zero()));
        chain
            .expect_sign_and_send()
            .returning(|_| Ok(H256::repeat_byte(0xbb)));
        chain.expect_wait_for_confirmation().returning(|tx_hash| {
            Err(ChainError::Reverted {
                tx_hash: format!("{:?}", tx_hash),
            })
        });

        let manager = AllowanceManager::new(Arc::new(chain), token());
        let err = manager
            .ensure_allowance(owner(), reserve(), U256::from(1u64))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::ApprovalFailed(FailureReason::ChainRejected(_))
        ));
    }
}
