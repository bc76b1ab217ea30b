//! Scripted collaborators for orchestrator and API tests

use crate::bridge::{AmountValidator, CompletionPoller, CorrelationId};
use crate::chain::{SourceChain, TxConfirmation};
use crate::contracts::{ApproveCall, DepositRoute, DepositToRemoteCall, TxKind, TxSpec};
use crate::coordination::attempt::{ExplorerLinks, TransferRequest};
use crate::coordination::engine::{OrchestratorConfig, TransferOrchestrator};
use crate::coordination::retry::RetryPolicy;
use crate::error::{BridgeError, BridgeResult, ChainError, ChainResult};
use crate::events::{ContractLogEvent, DestinationEvents, SMART_CONTRACT_LOG};
use crate::state::AttemptJournal;

use async_trait::async_trait;
use ethers::abi::AbiDecode;
use ethers::types::{Address, H256, U256};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

pub const DESTINATION: &str = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM";
pub const PROTOCOL_CONTRACT: &str = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM.usdcx-v1";

pub fn route() -> DepositRoute {
    DepositRoute {
        reserve: Address::repeat_byte(0x88),
        token: Address::repeat_byte(0x1c),
        remote_domain: 10003,
        max_fee: U256::zero(),
    }
}

pub fn request(chain: &FakeSourceChain, amount: &str) -> TransferRequest {
    TransferRequest {
        amount: amount.to_string(),
        source_account: chain.account(),
        destination_address: DESTINATION.to_string(),
        acknowledge_duplicate_risk: false,
    }
}

pub async fn memory_journal() -> Arc<AttemptJournal> {
    let journal = AttemptJournal::connect("sqlite::memory:", 1).await.unwrap();
    journal.run_migrations().await.unwrap();
    Arc::new(journal)
}

/// Orchestrator over the fakes with a zero poll interval
pub fn orchestrator(
    chain: Arc<FakeSourceChain>,
    events: Arc<ScriptedEvents>,
    journal: Option<Arc<AttemptJournal>>,
) -> Arc<TransferOrchestrator> {
    let poller = CompletionPoller::new(events, PROTOCOL_CONTRACT.to_string(), 50);
    let config = OrchestratorConfig {
        route: route(),
        validator: AmountValidator::default(),
        poll_policy: RetryPolicy::fixed(60, Duration::ZERO),
        links: ExplorerLinks {
            source: "https://sepolia.etherscan.io".to_string(),
            destination: "https://explorer.hiro.so/txid/{tx}?chain=testnet".to_string(),
        },
    };
    Arc::new(TransferOrchestrator::new(chain, poller, config, journal))
}

/// Source chain with an in-memory token ledger for one account
pub struct FakeSourceChain {
    account: Address,
    balance: Mutex<U256>,
    allowance: Mutex<U256>,
    sent: Mutex<Vec<TxSpec>>,
    rejected_kind: Mutex<Option<TxKind>>,
    confirmation_error: Mutex<Option<ChainError>>,
    awaited: Mutex<Vec<H256>>,
    balance_reads: AtomicU32,
    next_hash: AtomicU64,
}

impl FakeSourceChain {
    pub fn new(balance: U256, allowance: U256) -> Arc<Self> {
        Arc::new(Self {
            account: Address::repeat_byte(0xa1),
            balance: Mutex::new(balance),
            allowance: Mutex::new(allowance),
            sent: Mutex::new(Vec::new()),
            rejected_kind: Mutex::new(None),
            confirmation_error: Mutex::new(None),
            awaited: Mutex::new(Vec::new()),
            balance_reads: AtomicU32::new(0),
            next_hash: AtomicU64::new(1),
        })
    }

    /// The signer declines every transaction of `kind`
    pub fn reject(&self, kind: TxKind) {
        *self.rejected_kind.lock().unwrap() = Some(kind);
    }

    pub fn fail_confirmations(&self, error: ChainError) {
        *self.confirmation_error.lock().unwrap() = Some(error);
    }

    pub fn sent(&self) -> Vec<TxSpec> {
        self.sent.lock().unwrap().clone()
    }

    pub fn balance_reads(&self) -> u32 {
        self.balance_reads.load(Ordering::SeqCst)
    }

    pub fn confirmations_awaited(&self) -> Vec<H256> {
        self.awaited.lock().unwrap().clone()
    }

    pub fn last_deposit(&self) -> Option<DepositToRemoteCall> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|tx| tx.kind == TxKind::Deposit)
            .map(|tx| DepositToRemoteCall::decode(tx.data.as_ref()).unwrap())
    }
}

#[async_trait]
impl SourceChain for FakeSourceChain {
    fn account(&self) -> Address {
        self.account
    }

    async fn token_balance(&self, _token: Address, _owner: Address) -> ChainResult<U256> {
        self.balance_reads.fetch_add(1, Ordering::SeqCst);
        Ok(*self.balance.lock().unwrap())
    }

    async fn allowance(
        &self,
        _token: Address,
        _owner: Address,
        _spender: Address,
    ) -> ChainResult<U256> {
        Ok(*self.allowance.lock().unwrap())
    }

    async fn sign_and_send(&self, tx: TxSpec) -> ChainResult<H256> {
        if *self.rejected_kind.lock().unwrap() == Some(tx.kind) {
            return Err(ChainError::UserRejected);
        }

        if tx.kind == TxKind::Approval {
            let call = ApproveCall::decode(tx.data.as_ref()).unwrap();
            *self.allowance.lock().unwrap() = call.amount;
        }

        self.sent.lock().unwrap().push(tx);
        Ok(H256::from_low_u64_be(
            self.next_hash.fetch_add(1, Ordering::SeqCst),
        ))
    }

    async fn wait_for_confirmation(&self, tx_hash: H256) -> ChainResult<TxConfirmation> {
        self.awaited.lock().unwrap().push(tx_hash);
        if let Some(error) = self.confirmation_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(TxConfirmation {
            tx_hash,
            block_number: 100,
            confirmations: 1,
        })
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Stacks event log that shows the mint on a chosen query
pub struct ScriptedEvents {
    chain: Arc<FakeSourceChain>,
    found_on: Option<u32>,
    cancel_on: Option<u32>,
    watched: Option<CorrelationId>,
    queries: AtomicU32,
    orchestrator: OnceLock<Weak<TransferOrchestrator>>,
}

impl ScriptedEvents {
    fn build(chain: &Arc<FakeSourceChain>, found_on: Option<u32>) -> Self {
        Self {
            chain: Arc::clone(chain),
            found_on,
            cancel_on: None,
            watched: None,
            queries: AtomicU32::new(0),
            orchestrator: OnceLock::new(),
        }
    }

    /// The mint for the chain's latest deposit appears on query `n`
    pub fn found_on(chain: &Arc<FakeSourceChain>, n: u32) -> Arc<Self> {
        Arc::new(Self::build(chain, Some(n)))
    }

    pub fn never(chain: &Arc<FakeSourceChain>) -> Arc<Self> {
        Arc::new(Self::build(chain, None))
    }

    /// Request a cancel from inside query `n`
    pub fn cancel_on(self: Arc<Self>, n: u32) -> Arc<Self> {
        let mut events = Arc::try_unwrap(self).ok().unwrap();
        events.cancel_on = Some(n);
        Arc::new(events)
    }

    /// Mint for a fixed id instead of the latest deposit
    pub fn watching(self: Arc<Self>, id: CorrelationId) -> Arc<Self> {
        let mut events = Arc::try_unwrap(self).ok().unwrap();
        events.watched = Some(id);
        Arc::new(events)
    }

    pub fn attach(&self, orchestrator: &Arc<TransferOrchestrator>) {
        let _ = self.orchestrator.set(Arc::downgrade(orchestrator));
    }

    pub fn queries(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }

    fn minted_id(&self) -> Option<Vec<u8>> {
        match self.watched {
            Some(id) => Some(id.as_bytes().to_vec()),
            None => self
                .chain
                .last_deposit()
                .map(|deposit| deposit.hook_data.to_vec()),
        }
    }
}

fn mint_log(tx_id: &str, hook: &str) -> ContractLogEvent {
    ContractLogEvent {
        tx_id: tx_id.to_string(),
        event_type: SMART_CONTRACT_LOG.to_string(),
        repr: format!(
            "(tuple (amount u50000000) (hook-data {}) (recipient '{}) (topic \"mint\"))",
            hook, DESTINATION
        ),
    }
}

#[async_trait]
impl DestinationEvents for ScriptedEvents {
    async fn query_recent_events(
        &self,
        contract_id: &str,
        _page_size: u32,
    ) -> BridgeResult<Vec<ContractLogEvent>> {
        let n = self.queries.fetch_add(1, Ordering::SeqCst) + 1;

        if self.cancel_on == Some(n) {
            if let Some(orchestrator) = self.orchestrator.get().and_then(Weak::upgrade) {
                let _ = orchestrator.cancel().await;
            }
        }

        if contract_id != PROTOCOL_CONTRACT {
            return Err(BridgeError::DestinationQuery(format!(
                "unknown contract {}",
                contract_id
            )));
        }

        let mut events = vec![mint_log("0xother", &format!("0x{}", "ab".repeat(16)))];
        if self.found_on.map(|found| n >= found).unwrap_or(false) {
            if let Some(id) = self.minted_id() {
                events.insert(0, mint_log("0xmint", &hex::encode_upper(id)));
            }
        }
        Ok(events)
    }
}
