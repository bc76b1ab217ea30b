//! Transfer attempt state owned by the orchestrator

use crate::bridge::CorrelationId;
use crate::error::TransferError;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Idle,
    Checking,
    Approving,
    Depositing,
    Polling,
    Success,
    Error,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Idle => "idle",
            TransferState::Checking => "checking",
            TransferState::Approving => "approving",
            TransferState::Depositing => "depositing",
            TransferState::Polling => "polling",
            TransferState::Success => "success",
            TransferState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Success | TransferState::Error)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TransferState::Checking
                | TransferState::Approving
                | TransferState::Depositing
                | TransferState::Polling
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(TransferState::Idle),
            "checking" => Ok(TransferState::Checking),
            "approving" => Ok(TransferState::Approving),
            "depositing" => Ok(TransferState::Depositing),
            "polling" => Ok(TransferState::Polling),
            "success" => Ok(TransferState::Success),
            "error" => Ok(TransferState::Error),
            other => Err(format!("unknown transfer state: {}", other)),
        }
    }
}

/// User intent for one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Whole-token decimal text, e.g. "50" or "12.5"
    pub amount: String,
    pub source_account: Address,
    /// c32check Stacks principal
    pub destination_address: String,
    #[serde(default)]
    pub acknowledge_duplicate_risk: bool,
}

/// One user-initiated transfer, from confirmation until reset
#[derive(Debug, Clone)]
pub struct TransferAttempt {
    pub request: TransferRequest,
    pub correlation_id: CorrelationId,
    /// Amount in base units, known once validation passed
    pub value: Option<U256>,
    pub approval_tx: Option<H256>,
    pub deposit_tx: Option<H256>,
    pub destination_tx: Option<String>,
    pub state: TransferState,
    pub error: Option<TransferError>,
    pub poll_count: u32,
    pub started_at: DateTime<Utc>,
}

impl TransferAttempt {
    /// New attempt with a fresh correlation id, in `checking`
    pub fn new(request: TransferRequest) -> Self {
        Self {
            request,
            correlation_id: CorrelationId::generate(),
            value: None,
            approval_tx: None,
            deposit_tx: None,
            destination_tx: None,
            state: TransferState::Checking,
            error: None,
            poll_count: 0,
            started_at: Utc::now(),
        }
    }

    pub fn snapshot(&self, links: &ExplorerLinks) -> TransferSnapshot {
        TransferSnapshot {
            state: self.state,
            error: self.error.as_ref().map(|e| e.to_string()),
            error_detail: self.error.clone(),
            correlation_id: Some(self.correlation_id.to_hex()),
            amount: Some(self.request.amount.clone()),
            destination_address: Some(self.request.destination_address.clone()),
            approval_tx: self.approval_tx.map(|tx| format!("{:?}", tx)),
            deposit_tx: self.deposit_tx.map(|tx| format!("{:?}", tx)),
            deposit_explorer_url: self.deposit_tx.map(|tx| links.source_tx(tx)),
            destination_tx: self.destination_tx.clone(),
            destination_explorer_url: self
                .destination_tx
                .as_deref()
                .map(|tx| links.destination_tx(tx)),
            poll_count: self.poll_count,
        }
    }

    /// Deposit that may still complete without us watching
    pub fn unresolved(&self) -> Option<UnresolvedTransfer> {
        self.deposit_tx?;
        self.possibly_sent()
    }

    /// Guard for a deposit that may have been broadcast without its hash being recorded
    pub fn possibly_sent(&self) -> Option<UnresolvedTransfer> {
        Some(UnresolvedTransfer {
            correlation_id: self.correlation_id,
            value: self.value?,
            destination: self.request.destination_address.clone(),
            deposit_tx: self.deposit_tx,
        })
    }
}

/// What the UI collaborator sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub state: TransferState,
    pub error: Option<String>,
    pub error_detail: Option<TransferError>,
    pub correlation_id: Option<String>,
    pub amount: Option<String>,
    pub destination_address: Option<String>,
    pub approval_tx: Option<String>,
    pub deposit_tx: Option<String>,
    pub deposit_explorer_url: Option<String>,
    pub destination_tx: Option<String>,
    pub destination_explorer_url: Option<String>,
    pub poll_count: u32,
}

impl TransferSnapshot {
    pub fn idle() -> Self {
        Self {
            state: TransferState::Idle,
            error: None,
            error_detail: None,
            correlation_id: None,
            amount: None,
            destination_address: None,
            approval_tx: None,
            deposit_tx: None,
            deposit_explorer_url: None,
            destination_tx: None,
            destination_explorer_url: None,
            poll_count: 0,
        }
    }
}

/// A deposit whose mint was never observed (poll timeout, cancel, lost confirmation).
///
/// `deposit_tx` is `None` when a restart found the deposit mid-broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedTransfer {
    pub correlation_id: CorrelationId,
    pub value: U256,
    pub destination: String,
    pub deposit_tx: Option<H256>,
}

impl UnresolvedTransfer {
    pub fn matches(&self, value: U256, destination: &str) -> bool {
        self.value == value && self.destination == destination
    }
}

/// Explorer URL builders for both chains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerLinks {
    /// Etherscan-style base URL
    pub source: String,
    /// Template with a `{tx}` placeholder
    pub destination: String,
}

impl ExplorerLinks {
    pub fn source_tx(&self, tx_hash: H256) -> String {
        format!("{}/tx/{:?}", self.source.trim_end_matches('/'), tx_hash)
    }

    pub fn destination_tx(&self, tx_id: &str) -> String {
        self.destination.replace("{tx}", tx_id)
    }
}
