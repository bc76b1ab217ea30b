//! Transaction sender with retry logic for transient RPC failures

use super::gas::GasEstimator;
use crate::chain::{ChainProvider, GasPrice};
use crate::config::SourceConfig;
use crate::contracts::TxSpec;
use crate::coordination::RetryPolicy;
use crate::error::{ChainError, ChainResult};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Signs and broadcasts contract calls from the service wallet
pub struct TransactionSender {
    provider: Arc<ChainProvider>,
    gas_estimator: GasEstimator,
    /// Wallet for signing
    wallet: LocalWallet,
    send_timeout: Duration,
    /// Rebroadcast schedule for transient failures
    retry: RetryPolicy,
}

impl TransactionSender {
    pub fn new(provider: Arc<ChainProvider>, wallet: LocalWallet, config: &SourceConfig) -> Self {
        let wallet = wallet.with_chain_id(provider.chain_id());
        info!(
            "Transaction sender initialized with wallet: {:?}",
            wallet.address()
        );

        Self {
            provider,
            gas_estimator: GasEstimator::new(),
            wallet,
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            retry: send_retry_policy(config),
        }
    }

    /// Load the signing key from the named environment variable
    pub fn load_wallet(env_var: &str) -> ChainResult<LocalWallet> {
        let key = std::env::var(env_var).map_err(|_| {
            ChainError::Wallet(format!("No wallet configured. Set {}", env_var))
        })?;

        key.trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| ChainError::Wallet(format!("Invalid private key: {}", e)))
    }

    /// Build, sign and broadcast a contract call
    pub async fn send(&self, spec: &TxSpec) -> ChainResult<H256> {
        let from = self.wallet.address();
        let nonce = self.provider.get_transaction_count(from).await?;
        let gas_price = self.gas_estimator.get_gas_price(&self.provider).await?;

        let mut tx = self.build_tx(spec, nonce, &gas_price);
        let gas_limit = self
            .gas_estimator
            .estimate_gas_limit(&self.provider, &tx, spec.kind)
            .await?;
        tx.set_gas(gas_limit);

        let cost = GasEstimator::calculate_cost(gas_limit, &gas_price);
        let balance = self.provider.get_balance(from).await?;
        if balance < cost {
            warn!(
                "Wallet {:?} holds {} wei, {} needs up to {}",
                from, balance, spec.kind, cost
            );
            return Err(ChainError::InsufficientFunds);
        }

        debug!(
            "Sending {} tx to {:?} (nonce {}, gas {})",
            spec.kind, spec.to, nonce, gas_limit
        );
        self.send_with_retry(tx).await
    }

    fn build_tx(&self, spec: &TxSpec, nonce: U256, gas_price: &GasPrice) -> TypedTransaction {
        let from = self.wallet.address();
        let chain_id = self.provider.chain_id();

        match gas_price {
            GasPrice::Legacy(price) => {
                let tx = TransactionRequest::new()
                    .from(from)
                    .to(spec.to)
                    .data(spec.data.clone())
                    .nonce(nonce)
                    .gas_price(*price)
                    .chain_id(chain_id);
                TypedTransaction::Legacy(tx)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let tx = Eip1559TransactionRequest::new()
                    .from(from)
                    .to(spec.to)
                    .data(spec.data.clone())
                    .nonce(nonce)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                    .chain_id(chain_id);
                TypedTransaction::Eip1559(tx)
            }
        }
    }

    /// Send a signed transaction, retrying transient failures.
    ///
    /// Every attempt rebroadcasts the same signed bytes, so a node that
    /// already has the transaction yields its hash.
    async fn send_with_retry(&self, tx: TypedTransaction) -> ChainResult<H256> {
        let signature = self.wallet.sign_transaction(&tx).await.map_err(|e| {
            error!("Failed to sign transaction: {}", e);
            ChainError::Wallet(e.to_string())
        })?;
        let signed_tx = tx.rlp_signed(&signature);
        let expected_hash = tx.hash(&signature);

        let mut attempts = 0;
        let mut last_error = None;
        let mut timed_out = false;

        while attempts < self.retry.max_attempts {
            attempts += 1;

            let result = timeout(
                self.send_timeout,
                self.provider.http().send_raw_transaction(signed_tx.clone()),
            )
            .await;

            match result {
                Ok(Ok(pending_tx)) => {
                    let tx_hash = pending_tx.tx_hash();
                    info!(
                        "Transaction sent: {:?} (attempt {}/{})",
                        tx_hash, attempts, self.retry.max_attempts
                    );
                    return Ok(tx_hash);
                }
                Ok(Err(e)) => {
                    let error_msg = e.to_string();

                    if already_accepted(&error_msg, timed_out) {
                        info!(
                            "Transaction {:?} already accepted by node: {}",
                            expected_hash, error_msg
                        );
                        return Ok(expected_hash);
                    }

                    let classified = ChainError::classify(&error_msg);
                    if !classified.is_transient() {
                        warn!("Transaction rejected: {}", error_msg);
                        return Err(classified);
                    }

                    warn!(
                        "Transient send failure (attempt {}/{}): {}",
                        attempts, self.retry.max_attempts, error_msg
                    );
                    last_error = Some(classified);
                }
                Err(_) => {
                    warn!("Transaction send timeout (attempt {})", attempts);
                    timed_out = true;
                    last_error = Some(ChainError::Timeout {
                        operation: "send transaction".to_string(),
                    });
                }
            }

            if attempts < self.retry.max_attempts {
                tokio::time::sleep(self.retry.delay_for_attempt(attempts)).await;
            }
        }

        // A timed-out send may still have been accepted; the receipt wait decides
        if timed_out && matches!(last_error, Some(ChainError::Timeout { .. })) {
            warn!(
                "Send outcome unknown after {} attempts; tracking {:?}",
                attempts, expected_hash
            );
            return Ok(expected_hash);
        }

        Err(last_error.unwrap_or_else(|| ChainError::Rpc("Unknown send error".to_string())))
    }

    /// Get wallet address
    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }
}

/// Whether a send error means the node already has these signed bytes.
///
/// "nonce too low" counts only once an earlier attempt may have reached the node.
fn already_accepted(error_msg: &str, earlier_timeout: bool) -> bool {
    let lower = error_msg.to_lowercase();
    lower.contains("already known") || (earlier_timeout && lower.contains("nonce too low"))
}

/// Doubling delays from `retry_delay_ms`, capped at eight times the base
fn send_retry_policy(config: &SourceConfig) -> RetryPolicy {
    let base = Duration::from_millis(config.retry_delay_ms);
    RetryPolicy::exponential(config.max_send_retries.max(1), base, 2.0, base * 8)
}
