//! Source chain provider with multi-RPC support and automatic failover

use crate::config::{GasPriceStrategy, SourceConfig};
use crate::error::{ChainError, ChainResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    chain_id: u64,
    /// Source chain configuration
    config: SourceConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(chain_id: u64, config: SourceConfig) -> ChainResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(ChainError::Connection {
                chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            chain_id,
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> ChainResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.all_failed("block number"))
    }

    /// Get transaction receipt
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> ChainResult<Option<TransactionReceipt>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_receipt(tx_hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(
                        "Failed to get receipt for {:?} from chain {}: {}",
                        tx_hash, self.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.all_failed("transaction receipt"))
    }

    /// Read-only contract call against the latest block
    pub async fn call(&self, tx: &TypedTransaction) -> ChainResult<Bytes> {
        for _ in 0..self.http_providers.len() {
            match self.http().call(tx, None).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    let classified = ChainError::classify(&e.to_string());
                    if !classified.is_transient() {
                        return Err(classified);
                    }
                    warn!("eth_call failed on chain {}: {}", self.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(self.all_failed("eth_call"))
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> ChainResult<U256> {
        self.http().estimate_gas(tx, None).await.map_err(|e| {
            match ChainError::classify(&e.to_string()) {
                ChainError::Rpc(message) => ChainError::GasEstimation(message),
                other => other,
            }
        })
    }

    /// Get current gas price based on configured strategy
    pub async fn get_gas_price(&self) -> ChainResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| ChainError::GasEstimation(e.to_string()))?;
                Ok(GasPrice::Legacy(std::cmp::min(price, self.max_gas_price())))
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> ChainResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| ChainError::GasEstimation(e.to_string()))?
            .ok_or_else(|| ChainError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| ChainError::GasEstimation("No base fee in block".to_string()))?;

        // 2 gwei tip
        let priority_fee = U256::from(2_000_000_000u64);

        // Max fee = 2 * base_fee + priority_fee
        let max_fee = base_fee * 2 + priority_fee;
        let max_fee = std::cmp::min(max_fee, self.max_gas_price());

        Ok((max_fee, std::cmp::min(priority_fee, max_fee)))
    }

    fn max_gas_price(&self) -> U256 {
        U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64)
    }

    /// Next nonce for an account, counting pending transactions
    pub async fn get_transaction_count(&self, account: Address) -> ChainResult<U256> {
        self.http()
            .get_transaction_count(account, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.connection_error(e))
    }

    /// Native balance of an account
    pub async fn get_balance(&self, account: Address) -> ChainResult<U256> {
        self.http()
            .get_balance(account, None)
            .await
            .map_err(|e| self.connection_error(e))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.chain_id, e);
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn connection_error(&self, err: ProviderError) -> ChainError {
        ChainError::Connection {
            chain_id: self.chain_id,
            message: err.to_string(),
        }
    }

    fn all_failed(&self, operation: &str) -> ChainError {
        ChainError::Connection {
            chain_id: self.chain_id,
            message: format!("All providers failed to get {}", operation),
        }
    }
}

/// Gas price types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(urls: &[&str]) -> SourceConfig {
        let urls = urls
            .iter()
            .map(|url| format!("\"{}\"", url))
            .collect::<Vec<_>>()
            .join(", ");
        toml::from_str(&format!("rpc_urls = [{}]", urls)).unwrap()
    }

    #[test]
    fn test_requires_a_valid_rpc_url() {
        let err = ChainProvider::new(11155111, source(&["not a url"])).err().unwrap();
        assert!(matches!(err, ChainError::Connection { chain_id: 11155111, .. }));
    }

    #[test]
    fn test_skips_invalid_urls() {
        let provider =
            ChainProvider::new(1, source(&["not a url", "http://127.0.0.1:8545"])).unwrap();
        assert_eq!(provider.chain_id(), 1);
        provider.failover();
        provider.http();
    }
}
