//! Confirmation tracking for source chain transactions
//!
//! A transaction counts as confirmed once its receipt is at least
//! `confirmation_blocks` deep and a second receipt read still reports it in
//! the same block.

use super::{ChainProvider, TxConfirmation};
use crate::error::{ChainError, ChainResult};

use ethers::types::{TransactionReceipt, H256, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Waits for transactions to reach the configured depth
pub struct FinalityTracker {
    chain_id: u64,
    /// Required confirmation blocks (the inclusion block counts as one)
    confirmation_blocks: u64,
    provider: Arc<ChainProvider>,
    poll_interval: Duration,
    timeout: Duration,
}

impl FinalityTracker {
    /// Create a new finality tracker
    pub fn new(
        provider: Arc<ChainProvider>,
        confirmation_blocks: u64,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            chain_id: provider.chain_id(),
            confirmation_blocks: confirmation_blocks.max(1),
            provider,
            poll_interval,
            timeout,
        }
    }

    /// Block until the transaction is confirmed, reverted or the timeout passes
    pub async fn wait_for_finality(&self, tx_hash: H256) -> ChainResult<TxConfirmation> {
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.check(tx_hash).await {
                Ok(Some(confirmation)) => return Ok(confirmation),
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    warn!(
                        "Transient error checking {:?} on chain {}: {}",
                        tx_hash, self.chain_id, e
                    );
                }
                Err(e) => return Err(e),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(ChainError::Timeout {
                    operation: format!("confirmation of {:?}", tx_hash),
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One confirmation check; `None` while the transaction is not deep enough
    async fn check(&self, tx_hash: H256) -> ChainResult<Option<TxConfirmation>> {
        let receipt = match self.provider.get_transaction_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => {
                debug!("No receipt yet for {:?} on chain {}", tx_hash, self.chain_id);
                return Ok(None);
            }
        };

        let tx_block = match receipt.block_number {
            Some(block) => block.as_u64(),
            None => return Ok(None),
        };

        if receipt.status == Some(U64::zero()) {
            warn!("Transaction {:?} reverted on chain {}", tx_hash, self.chain_id);
            return Err(ChainError::Reverted {
                tx_hash: format!("{:?}", tx_hash),
            });
        }

        let current_block = self.provider.get_block_number().await?;
        let confirmations = confirmations_at(tx_block, current_block);

        if confirmations < self.confirmation_blocks {
            debug!(
                "Transaction {:?} has {} / {} confirmations on chain {}",
                tx_hash, confirmations, self.confirmation_blocks, self.chain_id
            );
            return Ok(None);
        }

        // Reorg protection
        if !self.verify_inclusion(tx_hash, &receipt).await? {
            warn!(
                "Transaction {:?} moved or disappeared on chain {}, waiting again",
                tx_hash, self.chain_id
            );
            return Ok(None);
        }

        info!(
            "Transaction {:?} confirmed on chain {} ({} confirmations)",
            tx_hash, self.chain_id, confirmations
        );
        Ok(Some(TxConfirmation {
            tx_hash,
            block_number: tx_block,
            confirmations,
        }))
    }

    /// Verify a transaction is still included in the same block
    async fn verify_inclusion(
        &self,
        tx_hash: H256,
        original: &TransactionReceipt,
    ) -> ChainResult<bool> {
        match self.provider.get_transaction_receipt(tx_hash).await? {
            Some(receipt) => Ok(receipt.block_hash == original.block_hash
                && receipt.status != Some(U64::zero())),
            None => Ok(false),
        }
    }
}

/// Confirmations of a transaction included at `tx_block`
pub fn confirmations_at(tx_block: u64, current_block: u64) -> u64 {
    if current_block < tx_block {
        0
    } else {
        current_block - tx_block + 1
    }
}

/// Get recommended confirmation blocks for a source chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 3,
        // Sepolia, Holesky
        11155111 | 17000 => 1,
        _ => 2,
    }
}
