//! Completion polling against the destination chain's event log

use super::correlation::CorrelationId;
use crate::events::{ContractLogEvent, DestinationEvents};

use std::sync::Arc;
use tracing::{debug, warn};

const HOOK_DATA_TAG: &str = "(hook-data ";
const MINT_TOPIC: &str = "(topic \"mint\")";
const MINT_TOPIC_ESCAPED: &str = "(topic \\\"mint\\\")";

/// Outcome of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Found { destination_tx: String },
    NotFoundYet,
}

pub struct CompletionPoller {
    events: Arc<dyn DestinationEvents>,
    contract_id: String,
    page_size: u32,
}

impl CompletionPoller {
    pub fn new(events: Arc<dyn DestinationEvents>, contract_id: String, page_size: u32) -> Self {
        Self {
            events,
            contract_id,
            page_size,
        }
    }

    /// One read of the recent event log. Never fails: read errors count as
    /// "not found yet" for this cycle.
    pub async fn poll_for_completion(&self, correlation_id: &CorrelationId) -> PollStatus {
        let events = match self
            .events
            .query_recent_events(&self.contract_id, self.page_size)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(
                    "Event query for {} failed, treating as not found: {}",
                    correlation_id, e
                );
                return PollStatus::NotFoundYet;
            }
        };

        match find_mint(&events, correlation_id) {
            Some(event) => PollStatus::Found {
                destination_tx: event.tx_id.clone(),
            },
            None => {
                debug!(
                    "No mint for {} among {} events",
                    correlation_id,
                    events.len()
                );
                PollStatus::NotFoundYet
            }
        }
    }
}

/// First mint log whose hook data equals `correlation_id`
pub fn find_mint<'a>(
    events: &'a [ContractLogEvent],
    correlation_id: &CorrelationId,
) -> Option<&'a ContractLogEvent> {
    events.iter().find(|event| {
        event.is_contract_log()
            && is_mint(&event.repr)
            && hook_data(&event.repr).as_deref() == Some(&correlation_id.as_bytes()[..])
    })
}

fn is_mint(repr: &str) -> bool {
    repr.contains(MINT_TOPIC) || repr.contains(MINT_TOPIC_ESCAPED)
}

/// Bytes of the `(hook-data 0x..)` field, hex in any case, prefix optional
fn hook_data(repr: &str) -> Option<Vec<u8>> {
    let lower = repr.to_ascii_lowercase();
    let start = lower.find(HOOK_DATA_TAG)? + HOOK_DATA_TAG.len();
    let token: String = lower[start..]
        .chars()
        .take_while(|c| *c != ')' && !c.is_whitespace())
        .collect();
    let digits = token.strip_prefix("0x").unwrap_or(&token);
    hex::decode(digits).ok()
}
