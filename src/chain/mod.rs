//! Chain module - the source (EVM) side of a transfer
//!
//! This module provides:
//! - The `SourceChain` trait the bridge components are written against
//! - Multi-RPC provider management with automatic failover
//! - Confirmation tracking with reorg re-checks
//! - `EvmSourceChain`, the production implementation

pub mod evm;
pub mod finality;
pub mod provider;

pub use evm::EvmSourceChain;
pub use finality::FinalityTracker;
pub use provider::{ChainProvider, GasPrice};

use crate::contracts::TxSpec;
use crate::error::ChainResult;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde::Serialize;

/// A transaction that reached the required depth
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxConfirmation {
    pub tx_hash: H256,
    pub block_number: u64,
    pub confirmations: u64,
}

/// Wallet and signing collaborator on the source chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceChain: Send + Sync {
    /// Account that signs every transaction
    fn account(&self) -> Address;

    async fn token_balance(&self, token: Address, owner: Address) -> ChainResult<U256>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address)
        -> ChainResult<U256>;

    /// Sign and broadcast; user rejection surfaces as `ChainError::UserRejected`
    async fn sign_and_send(&self, tx: TxSpec) -> ChainResult<H256>;

    /// Wait on the chain's own confirmation signal
    async fn wait_for_confirmation(&self, tx_hash: H256) -> ChainResult<TxConfirmation>;

    async fn health_check(&self) -> bool;
}
