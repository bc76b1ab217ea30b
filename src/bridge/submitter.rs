//! Deposit submission to the xReserve relay contract

use super::address::RemoteRecipient;
use super::correlation::CorrelationId;
use crate::chain::{SourceChain, TxConfirmation};
use crate::contracts::{deposit_tx, DepositRoute};
use crate::error::{ChainError, FailureReason, TransferError};

use ethers::types::{H256, U256};
use std::sync::Arc;
use tracing::{info, warn};

pub struct TransferSubmitter {
    chain: Arc<dyn SourceChain>,
    route: DepositRoute,
}

impl TransferSubmitter {
    pub fn new(chain: Arc<dyn SourceChain>, route: DepositRoute) -> Self {
        Self { chain, route }
    }

    /// Sign and broadcast `depositToRemote`; the correlation id rides as hook data
    pub async fn submit_deposit(
        &self,
        amount: U256,
        recipient: &RemoteRecipient,
        correlation_id: &CorrelationId,
    ) -> Result<H256, TransferError> {
        let tx = deposit_tx(&self.route, amount, recipient, correlation_id);

        let tx_hash = self.chain.sign_and_send(tx).await.map_err(|e| match e {
            ChainError::UserRejected => TransferError::DepositRejected,
            other => {
                warn!("Deposit {} not accepted: {}", correlation_id, other);
                TransferError::DepositFailed(FailureReason::from(other))
            }
        })?;

        crate::metrics::record_tx_submitted("deposit");
        info!(
            "Deposit {:?} submitted for {} to domain {}",
            tx_hash, correlation_id, self.route.remote_domain
        );
        Ok(tx_hash)
    }

    /// Wait for source-chain confirmation of a submitted deposit.
    ///
    /// Only a reverted receipt is a failure. Anything else means the outcome
    /// is unknown and the funds may have moved.
    pub async fn await_confirmation(
        &self,
        tx_hash: H256,
    ) -> Result<TxConfirmation, TransferError> {
        self.chain
            .wait_for_confirmation(tx_hash)
            .await
            .map_err(|e| match e {
                ChainError::Reverted { .. } => {
                    TransferError::DepositFailed(FailureReason::from(e))
                }
                other => TransferError::DepositUnconfirmed {
                    tx_hash: format!("{:?}", tx_hash),
                    detail: other.to_string(),
                },
            })
    }
}
