//! `SourceChain` over JSON-RPC with a local signing wallet

use super::{ChainProvider, FinalityTracker, SourceChain, TxConfirmation};
use crate::config::SourceConfig;
use crate::contracts::{allowance_calldata, balance_of_calldata, decode_uint, TxSpec};
use crate::error::ChainResult;
use crate::tx::TransactionSender;

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct EvmSourceChain {
    provider: Arc<ChainProvider>,
    sender: TransactionSender,
    finality: FinalityTracker,
}

impl EvmSourceChain {
    pub fn new(
        provider: Arc<ChainProvider>,
        wallet: LocalWallet,
        config: &SourceConfig,
        confirmation_blocks: u64,
    ) -> Self {
        let sender = TransactionSender::new(provider.clone(), wallet, config);
        let finality = FinalityTracker::new(
            provider.clone(),
            confirmation_blocks,
            Duration::from_millis(config.receipt_poll_interval_ms),
            Duration::from_secs(config.receipt_timeout_secs),
        );

        Self {
            provider,
            sender,
            finality,
        }
    }

    async fn read_uint(&self, to: Address, data: Bytes) -> ChainResult<U256> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        let output = self.provider.call(&tx).await?;
        decode_uint(&output)
    }
}

#[async_trait]
impl SourceChain for EvmSourceChain {
    fn account(&self) -> Address {
        self.sender.wallet_address()
    }

    async fn token_balance(&self, token: Address, owner: Address) -> ChainResult<U256> {
        let balance = self.read_uint(token, balance_of_calldata(owner)).await?;
        debug!("Token {:?} balance of {:?}: {}", token, owner, balance);
        Ok(balance)
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> ChainResult<U256> {
        self.read_uint(token, allowance_calldata(owner, spender))
            .await
    }

    async fn sign_and_send(&self, tx: TxSpec) -> ChainResult<H256> {
        self.sender.send(&tx).await
    }

    async fn wait_for_confirmation(&self, tx_hash: H256) -> ChainResult<TxConfirmation> {
        self.finality.wait_for_finality(tx_hash).await
    }

    async fn health_check(&self) -> bool {
        self.provider.health_check().await
    }
}
