//! Hiro Stacks API client for contract events

use super::{ContractLogEvent, DestinationEvents};
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    results: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    tx_id: String,
    #[serde(default)]
    event_type: String,
    contract_log: Option<RawContractLog>,
}

#[derive(Debug, Deserialize)]
struct RawContractLog {
    value: Option<RawClarityValue>,
}

#[derive(Debug, Deserialize)]
struct RawClarityValue {
    #[serde(default)]
    repr: String,
}

impl From<RawEvent> for ContractLogEvent {
    fn from(raw: RawEvent) -> Self {
        let repr = raw
            .contract_log
            .and_then(|log| log.value)
            .map(|value| value.repr)
            .unwrap_or_default();

        ContractLogEvent {
            tx_id: raw.tx_id,
            event_type: raw.event_type,
            repr,
        }
    }
}

/// Reads `/extended/v1/contract/{id}/events`
pub struct HiroEventsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HiroEventsClient {
    pub fn new(base_url: &str, timeout: Duration, api_key: Option<String>) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    fn events_url(&self, contract_id: &str, page_size: u32) -> String {
        format!(
            "{}/extended/v1/contract/{}/events?limit={}",
            self.base_url, contract_id, page_size
        )
    }
}

#[async_trait]
impl DestinationEvents for HiroEventsClient {
    async fn query_recent_events(
        &self,
        contract_id: &str,
        page_size: u32,
    ) -> BridgeResult<Vec<ContractLogEvent>> {
        let url = self.events_url(contract_id, page_size);
        let mut request = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::DestinationQuery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::DestinationQuery(format!(
                "{} returned {}",
                url, status
            )));
        }

        let page: EventsPage = response
            .json()
            .await
            .map_err(|e| BridgeError::DestinationQuery(format!("Malformed events page: {}", e)))?;

        debug!("Fetched {} events for {}", page.results.len(), contract_id);
        Ok(page.results.into_iter().map(ContractLogEvent::from).collect())
    }
}
