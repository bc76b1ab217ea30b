//! Gas estimation with safety buffers

use crate::chain::{ChainProvider, GasPrice};
use crate::contracts::TxKind;
use crate::error::ChainResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::{debug, warn};

/// Gas estimator for transactions
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new() -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
        }
    }

    /// Estimate a buffered gas limit.
    ///
    /// Reverts (allowance, balance) propagate; only transport failures fall
    /// back to a fixed limit for the transaction kind.
    pub async fn estimate_gas_limit(
        &self,
        provider: &ChainProvider,
        tx: &TypedTransaction,
        kind: TxKind,
    ) -> ChainResult<U256> {
        let estimated = match provider.estimate_gas(tx).await {
            Ok(gas) => gas,
            Err(e) if e.is_transient() => {
                warn!("Gas estimation unavailable for {}, using fallback: {}", kind, e);
                fallback_gas_limit(kind)
            }
            Err(e) => return Err(e),
        };

        Ok(self.with_limit_buffer(estimated))
    }

    /// Get buffered gas price for the source chain
    pub async fn get_gas_price(&self, provider: &ChainProvider) -> ChainResult<GasPrice> {
        let gas_price = provider.get_gas_price().await?;
        let buffered = self.with_price_buffer(gas_price);
        debug!("Gas price for chain {}: {:?}", provider.chain_id(), buffered);
        Ok(buffered)
    }

    fn with_limit_buffer(&self, gas: U256) -> U256 {
        gas + gas * self.gas_limit_buffer_percent / 100
    }

    fn with_price_buffer(&self, gas_price: GasPrice) -> GasPrice {
        match gas_price {
            GasPrice::Legacy(price) => {
                let buffer = price * self.gas_price_buffer_percent / 100;
                GasPrice::Legacy(price + buffer)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let fee_buffer = max_fee_per_gas * self.gas_price_buffer_percent / 100;
                let priority_buffer =
                    max_priority_fee_per_gas * self.gas_price_buffer_percent / 100;
                GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee_per_gas + fee_buffer,
                    max_priority_fee_per_gas: max_priority_fee_per_gas + priority_buffer,
                }
            }
        }
    }

    /// Worst-case cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => gas_limit * *max_fee_per_gas,
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn fallback_gas_limit(kind: TxKind) -> U256 {
    match kind {
        TxKind::Approval => U256::from(60_000u64),
        TxKind::Deposit => U256::from(250_000u64),
    }
}
