//! Destination chain (Stacks) event types and query interface

mod hiro;

pub use hiro::HiroEventsClient;

use crate::error::BridgeResult;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Event type tag of a Clarity `print` log
pub const SMART_CONTRACT_LOG: &str = "smart_contract_log";

/// One event from a contract's recent event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractLogEvent {
    pub tx_id: String,
    pub event_type: String,
    /// Clarity value repr, e.g. `(tuple (hook-data 0x..) (topic "mint"))`
    pub repr: String,
}

impl ContractLogEvent {
    pub fn is_contract_log(&self) -> bool {
        self.event_type == SMART_CONTRACT_LOG
    }
}

/// Destination-chain query collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DestinationEvents: Send + Sync {
    /// Most recent events of `contract_id`, newest first
    async fn query_recent_events(
        &self,
        contract_id: &str,
        page_size: u32,
    ) -> BridgeResult<Vec<ContractLogEvent>>;
}
