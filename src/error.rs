//! Error types for the bridge orchestrator

use crate::bridge::address::AddressError;

use serde::Serialize;
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("A transfer is already in progress (state: {state})")]
    TransferInProgress { state: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Source account {requested} does not match the service wallet {wallet}")]
    AccountMismatch { requested: String, wallet: String },

    #[error("Invalid correlation id: {0}")]
    InvalidCorrelationId(String),

    #[error("Destination query failed: {0}")]
    DestinationQuery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for service operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Failures reported by the source chain (wallet, RPC, signer)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Transaction rejected by user")]
    UserRejected,

    #[error("Insufficient funds for gas")]
    InsufficientFunds,

    #[error("Insufficient token allowance")]
    InsufficientAllowance,

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Chain connection error for chain {chain_id}: {message}")]
    Connection { chain_id: u64, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl ChainError {
    /// Classify a raw RPC or signer message
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("user rejected")
            || lower.contains("user denied")
            || lower.contains("rejected the request")
        {
            return ChainError::UserRejected;
        }

        if lower.contains("insufficient funds") {
            return ChainError::InsufficientFunds;
        }

        if lower.contains("insufficient allowance")
            || lower.contains("exceeds allowance")
        {
            return ChainError::InsufficientAllowance;
        }

        if lower.contains("timeout") || lower.contains("timed out") {
            return ChainError::Timeout {
                operation: message.to_string(),
            };
        }

        ChainError::Rpc(message.to_string())
    }

    /// Check if error is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Timeout { .. } | ChainError::Connection { .. } => true,
            ChainError::Rpc(message) => {
                let lower = message.to_lowercase();
                lower.contains("connection")
                    || lower.contains("rate limit")
                    || lower.contains("too many requests")
                    || lower.contains("503")
                    || lower.contains("502")
                    || lower.contains("temporarily unavailable")
            }
            _ => false,
        }
    }
}

/// Result type for source chain operations
pub type ChainResult<T> = Result<T, ChainError>;

/// Sub-classification of a failed approval or deposit
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("Insufficient ETH for gas")]
    InsufficientGasFunds,

    #[error("Insufficient USDC allowance")]
    AllowanceRace,

    #[error("{0}")]
    ChainRejected(String),
}

impl From<ChainError> for FailureReason {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InsufficientFunds => FailureReason::InsufficientGasFunds,
            ChainError::InsufficientAllowance => FailureReason::AllowanceRace,
            other => FailureReason::ChainRejected(other.to_string()),
        }
    }
}

/// Errors a transfer attempt can end in.
///
/// The `Display` text is the message shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransferError {
    #[error("Please enter a valid amount: {0}")]
    InvalidAmount(String),

    #[error("Minimum amount is {minimum} USDC")]
    BelowMinimum { minimum: String },

    #[error("Insufficient USDC balance: have {have}, need {need}")]
    InsufficientBalance { have: String, need: String },

    #[error("Invalid Stacks address: {0}")]
    MalformedAddress(String),

    #[error("Could not read from the source chain: {0}")]
    SourceUnavailable(String),

    #[error("Approval rejected by user")]
    ApprovalRejected,

    #[error("Approval failed: {0}")]
    ApprovalFailed(FailureReason),

    #[error("Transaction rejected by user")]
    DepositRejected,

    #[error("Bridge deposit failed: {0}")]
    DepositFailed(FailureReason),

    #[error(
        "Deposit {tx_hash} was submitted but its confirmation could not be observed ({detail}); \
         check the Ethereum explorer before retrying"
    )]
    DepositUnconfirmed { tx_hash: String, detail: String },

    #[error(
        "Deposit confirmed, but the Stacks mint was not observed after {attempts} checks; \
         the transfer may still complete, check the Stacks explorer"
    )]
    PollTimeout { attempts: u32 },

    #[error("Transfer was interrupted before a deposit was submitted; it is safe to retry")]
    Interrupted,

    #[error(
        "Transfer was interrupted while the deposit was being sent; it may have been broadcast, \
         check the Ethereum explorer before retrying"
    )]
    DepositOutcomeUnknown,

    #[error(
        "A previous deposit ({correlation_id}) for the same amount and recipient has not been \
         observed on Stacks yet; confirm to send another"
    )]
    PossibleDuplicate {
        correlation_id: String,
        deposit_tx: Option<String>,
    },
}

impl From<AddressError> for TransferError {
    fn from(err: AddressError) -> Self {
        TransferError::MalformedAddress(err.to_string())
    }
}

impl TransferError {
    /// Check if funds may already have left the source chain
    pub fn funds_may_have_moved(&self) -> bool {
        matches!(
            self,
            TransferError::DepositUnconfirmed { .. }
                | TransferError::DepositOutcomeUnknown
                | TransferError::PollTimeout { .. }
        )
    }

    /// Check if retrying `start` from idle is safe
    pub fn is_retryable(&self) -> bool {
        !self.funds_may_have_moved() && !matches!(self, TransferError::PossibleDuplicate { .. })
    }

    /// Stable name used in the attempt journal
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount(_) => "invalid_amount",
            TransferError::BelowMinimum { .. } => "below_minimum",
            TransferError::InsufficientBalance { .. } => "insufficient_balance",
            TransferError::MalformedAddress(_) => "malformed_address",
            TransferError::SourceUnavailable(_) => "source_unavailable",
            TransferError::ApprovalRejected => "approval_rejected",
            TransferError::ApprovalFailed(_) => "approval_failed",
            TransferError::DepositRejected => "deposit_rejected",
            TransferError::DepositFailed(_) => "deposit_failed",
            TransferError::DepositUnconfirmed { .. } => "deposit_unconfirmed",
            TransferError::PollTimeout { .. } => "poll_timeout",
            TransferError::Interrupted => "interrupted",
            TransferError::DepositOutcomeUnknown => "deposit_outcome_unknown",
            TransferError::PossibleDuplicate { .. } => "possible_duplicate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_user_rejection() {
        assert_eq!(
            ChainError::classify("MetaMask Tx Signature: User denied transaction signature."),
            ChainError::UserRejected
        );
        assert_eq!(
            ChainError::classify("User rejected the request."),
            ChainError::UserRejected
        );
    }

    #[test]
    fn test_classify_gas_and_allowance() {
        assert_eq!(
            ChainError::classify("insufficient funds for gas * price + value"),
            ChainError::InsufficientFunds
        );
        assert_eq!(
            ChainError::classify("execution reverted: ERC20: insufficient allowance"),
            ChainError::InsufficientAllowance
        );
    }

    #[test]
    fn test_failure_reason_from_chain_error() {
        assert_eq!(
            FailureReason::from(ChainError::InsufficientFunds),
            FailureReason::InsufficientGasFunds
        );
        assert_eq!(
            FailureReason::from(ChainError::InsufficientAllowance),
            FailureReason::AllowanceRace
        );
        assert!(matches!(
            FailureReason::from(ChainError::Rpc("nonce too low".into())),
            FailureReason::ChainRejected(_)
        ));
    }

    #[test]
    fn test_post_deposit_errors_are_soft() {
        let timeout = TransferError::PollTimeout { attempts: 60 };
        assert!(timeout.funds_may_have_moved());
        assert!(!timeout.is_retryable());
        assert!(!timeout.to_string().to_lowercase().contains("failed"));

        assert!(TransferError::DepositRejected.is_retryable());
        assert!(!TransferError::DepositOutcomeUnknown.is_retryable());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ChainError::Rpc("502 Bad Gateway".into()).is_transient());
        assert!(!ChainError::UserRejected.is_transient());
        assert!(!ChainError::Reverted { tx_hash: "0x1".into() }.is_transient());
    }
}
