//! Transfer orchestrator: the state machine driving one transfer at a time

use super::attempt::{
    ExplorerLinks, TransferAttempt, TransferRequest, TransferSnapshot, TransferState,
    UnresolvedTransfer,
};
use super::retry::{poll_until, RetryOutcome, RetryPolicy};
use super::saga::{Saga, SagaOutcome, SagaStep};
use crate::bridge::address::{self, RemoteRecipient};
use crate::bridge::{
    AllowanceManager, AmountValidator, CompletionPoller, CorrelationId, PollStatus,
    TransferSubmitter,
};
use crate::chain::SourceChain;
use crate::contracts::DepositRoute;
use crate::error::{BridgeError, BridgeResult, TransferError};
use crate::state::{AttemptJournal, AttemptRecord, PHASE_CANCELLED};

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::U256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Static wiring of an orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub route: DepositRoute,
    pub validator: AmountValidator,
    pub poll_policy: RetryPolicy,
    pub links: ExplorerLinks,
}

/// What start-up replay of the journal found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Nothing to pick up
    Clean,
    /// The last attempt left a deposit that was never seen on Stacks
    GuardRestored(UnresolvedTransfer),
    /// The last attempt stopped before any deposit was sent
    Interrupted { correlation_id: CorrelationId },
    /// The last attempt stopped mid-deposit with no hash recorded
    DepositUncertain(UnresolvedTransfer),
    /// The last attempt has a deposit and can be watched again
    Resumable {
        correlation_id: CorrelationId,
        awaiting_confirmation: bool,
        remaining_polls: u32,
    },
}

/// Drives `idle -> checking -> approving -> depositing -> polling -> success | error`.
///
/// At most one attempt exists at a time. `start` claims the slot, `drive`
/// runs it, `cancel` is observed at the next step or poll boundary, and
/// `reset` frees a finished slot.
pub struct TransferOrchestrator {
    chain: Arc<dyn SourceChain>,
    validator: AmountValidator,
    route: DepositRoute,
    allowance: AllowanceManager,
    submitter: TransferSubmitter,
    poller: CompletionPoller,
    poll_policy: RetryPolicy,
    links: ExplorerLinks,
    journal: Option<Arc<AttemptJournal>>,
    /// `None` is idle
    current: RwLock<Option<TransferAttempt>>,
    cancel_requested: AtomicBool,
    /// Duplicate-risk guard
    unresolved: RwLock<Option<UnresolvedTransfer>>,
}

impl TransferOrchestrator {
    pub fn new(
        chain: Arc<dyn SourceChain>,
        poller: CompletionPoller,
        config: OrchestratorConfig,
        journal: Option<Arc<AttemptJournal>>,
    ) -> Self {
        let allowance = AllowanceManager::new(chain.clone(), config.route.token);
        let submitter = TransferSubmitter::new(chain.clone(), config.route.clone());

        Self {
            chain,
            validator: config.validator,
            route: config.route,
            allowance,
            submitter,
            poller,
            poll_policy: config.poll_policy,
            links: config.links,
            journal,
            current: RwLock::new(None),
            cancel_requested: AtomicBool::new(false),
            unresolved: RwLock::new(None),
        }
    }

    /// Claim the idle slot for a new attempt in `checking`.
    ///
    /// Rejected without touching the existing attempt unless idle.
    pub async fn start(&self, request: TransferRequest) -> BridgeResult<TransferSnapshot> {
        let mut current = self.current.write().await;

        if let Some(attempt) = current.as_ref() {
            return Err(if attempt.state.is_active() {
                BridgeError::TransferInProgress {
                    state: attempt.state.to_string(),
                }
            } else {
                BridgeError::InvalidStateTransition {
                    from: attempt.state.to_string(),
                    to: TransferState::Checking.to_string(),
                }
            });
        }

        let wallet = self.chain.account();
        if request.source_account != wallet {
            return Err(BridgeError::AccountMismatch {
                requested: format!("{:?}", request.source_account),
                wallet: format!("{:?}", wallet),
            });
        }

        self.check_duplicate(&request).await?;

        self.cancel_requested.store(false, Ordering::SeqCst);
        let attempt = TransferAttempt::new(request);
        info!(
            "Transfer {} started: {} USDC to {}",
            attempt.correlation_id, attempt.request.amount, attempt.request.destination_address
        );

        let snapshot = attempt.snapshot(&self.links);
        self.record(&attempt, attempt.state.as_str()).await;
        crate::metrics::record_transfer_started();
        *current = Some(attempt);

        Ok(snapshot)
    }

    async fn check_duplicate(&self, request: &TransferRequest) -> BridgeResult<()> {
        let mut unresolved = self.unresolved.write().await;

        if request.acknowledge_duplicate_risk {
            if let Some(previous) = unresolved.take() {
                warn!(
                    "Duplicate risk acknowledged; no longer guarding transfer {}",
                    previous.correlation_id
                );
            }
            return Ok(());
        }

        let Some(previous) = unresolved.as_ref() else {
            return Ok(());
        };
        let Ok(value) = self.validator.parse(&request.amount) else {
            return Ok(());
        };

        if previous.matches(value, &request.destination_address) {
            return Err(TransferError::PossibleDuplicate {
                correlation_id: previous.correlation_id.to_hex(),
                deposit_tx: previous.deposit_tx.map(|tx| format!("{:?}", tx)),
            }
            .into());
        }

        Ok(())
    }

    /// Run the attempt claimed by `start` to a terminal state or back to idle
    pub async fn drive(self: &Arc<Self>) {
        let claimed = self
            .current
            .read()
            .await
            .as_ref()
            .filter(|attempt| attempt.state == TransferState::Checking)
            .map(|attempt| (attempt.request.clone(), attempt.correlation_id));

        let Some((request, correlation_id)) = claimed else {
            warn!("Nothing to drive: no attempt waiting in checking");
            return;
        };

        let mut ctx = TransferContext {
            orchestrator: Arc::clone(self),
            request,
            correlation_id,
            recipient: None,
            value: U256::zero(),
        };

        let saga = transfer_saga();
        let outcome = saga
            .run(&mut ctx, || self.cancel_requested.load(Ordering::SeqCst))
            .await;

        match outcome {
            SagaOutcome::Completed => self.watch_for_mint(self.poll_policy.clone()).await,
            SagaOutcome::Failed { error, .. } => self.fail(error).await,
            SagaOutcome::Stopped { before, .. } => {
                info!("Transfer {} cancelled before {}", correlation_id, before);
                self.finish_cancelled().await;
            }
        }
    }

    /// `start` then `drive` inline; returns the final snapshot
    pub async fn run(self: &Arc<Self>, request: TransferRequest) -> BridgeResult<TransferSnapshot> {
        self.start(request).await?;
        self.drive().await;
        Ok(self.snapshot().await)
    }

    /// `start` then `drive` on a background task
    pub async fn spawn(self: &Arc<Self>, request: TransferRequest) -> BridgeResult<TransferSnapshot> {
        let snapshot = self.start(request).await?;
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.drive().await });
        Ok(snapshot)
    }

    /// Ask the active attempt to stop watching.
    ///
    /// Never interrupts a chain call and never reverses a submitted deposit.
    pub async fn cancel(&self) -> BridgeResult<TransferSnapshot> {
        let current = self.current.read().await;

        match current.as_ref() {
            Some(attempt) if attempt.state.is_active() => {
                self.cancel_requested.store(true, Ordering::SeqCst);
                info!(
                    "Cancel requested for {} in {}",
                    attempt.correlation_id, attempt.state
                );
                Ok(attempt.snapshot(&self.links))
            }
            other => Err(BridgeError::InvalidStateTransition {
                from: other
                    .map(|attempt| attempt.state)
                    .unwrap_or(TransferState::Idle)
                    .to_string(),
                to: TransferState::Idle.to_string(),
            }),
        }
    }

    /// Discard a finished attempt and return to idle
    pub async fn reset(&self) -> BridgeResult<()> {
        let mut current = self.current.write().await;

        if let Some(attempt) = current.as_ref() {
            if attempt.state.is_active() {
                return Err(BridgeError::InvalidStateTransition {
                    from: attempt.state.to_string(),
                    to: TransferState::Idle.to_string(),
                });
            }
            info!("Transfer {} reset from {}", attempt.correlation_id, attempt.state);
        }

        *current = None;
        Ok(())
    }

    pub async fn snapshot(&self) -> TransferSnapshot {
        self.current
            .read()
            .await
            .as_ref()
            .map(|attempt| attempt.snapshot(&self.links))
            .unwrap_or_else(TransferSnapshot::idle)
    }

    pub async fn state(&self) -> TransferState {
        self.current
            .read()
            .await
            .as_ref()
            .map(|attempt| attempt.state)
            .unwrap_or(TransferState::Idle)
    }

    pub async fn unresolved(&self) -> Option<UnresolvedTransfer> {
        self.unresolved.read().await.clone()
    }

    pub fn chain(&self) -> &Arc<dyn SourceChain> {
        &self.chain
    }

    /// Replay the newest journal record after a restart
    pub async fn recover(&self) -> BridgeResult<Recovery> {
        let Some(journal) = &self.journal else {
            return Ok(Recovery::Clean);
        };
        let Some(record) = journal.latest().await? else {
            return Ok(Recovery::Clean);
        };

        let state = record.phase.parse::<TransferState>().ok();
        if !state.map(|s| s.is_active()).unwrap_or(false) {
            return Ok(self.restore_guard(record).await);
        }

        let started_at = journal
            .history(&record.correlation_id)
            .await?
            .first()
            .map(|first| first.recorded_at)
            .unwrap_or(record.recorded_at);

        let mut attempt = TransferAttempt {
            request: TransferRequest {
                amount: record.amount,
                source_account: record.source_account,
                destination_address: record.destination,
                acknowledge_duplicate_risk: false,
            },
            correlation_id: record.correlation_id,
            value: record.value,
            approval_tx: record.approval_tx,
            deposit_tx: record.deposit_tx,
            destination_tx: record.destination_tx,
            state: state.unwrap_or(TransferState::Checking),
            error: None,
            poll_count: record.poll_count,
            started_at,
        };
        let correlation_id = attempt.correlation_id;

        self.cancel_requested.store(false, Ordering::SeqCst);

        if attempt.deposit_tx.is_none() && attempt.state == TransferState::Depositing {
            warn!(
                "Transfer {} was interrupted while depositing; the deposit may have been broadcast",
                correlation_id
            );
            attempt.state = TransferState::Error;
            attempt.error = Some(TransferError::DepositOutcomeUnknown);
            self.record(&attempt, attempt.state.as_str()).await;
            let guard = attempt.possibly_sent();
            *self.unresolved.write().await = guard.clone();
            *self.current.write().await = Some(attempt);
            return Ok(match guard {
                Some(guard) => Recovery::DepositUncertain(guard),
                None => Recovery::Interrupted { correlation_id },
            });
        }

        if attempt.deposit_tx.is_none() {
            warn!(
                "Transfer {} was interrupted in {} before any deposit",
                correlation_id, attempt.state
            );
            attempt.state = TransferState::Error;
            attempt.error = Some(TransferError::Interrupted);
            self.record(&attempt, attempt.state.as_str()).await;
            *self.current.write().await = Some(attempt);
            return Ok(Recovery::Interrupted { correlation_id });
        }

        let awaiting_confirmation = attempt.state != TransferState::Polling;
        let remaining_polls = self
            .poll_policy
            .max_attempts
            .saturating_sub(attempt.poll_count);
        info!(
            "Resuming transfer {} from {} ({} polls left)",
            correlation_id, attempt.state, remaining_polls
        );
        *self.current.write().await = Some(attempt);

        Ok(Recovery::Resumable {
            correlation_id,
            awaiting_confirmation,
            remaining_polls,
        })
    }

    async fn restore_guard(&self, record: AttemptRecord) -> Recovery {
        let outcome_unknown = record.error_kind.as_deref() == Some("deposit_outcome_unknown");
        let soft = record.phase == PHASE_CANCELLED
            || outcome_unknown
            || matches!(
                record.error_kind.as_deref(),
                Some("poll_timeout") | Some("deposit_unconfirmed")
            );
        // Only an uncertain broadcast is guarded without a hash
        let sent = record.deposit_tx.is_some() || outcome_unknown;

        match (soft && sent, record.value) {
            (true, Some(value)) => {
                let guard = UnresolvedTransfer {
                    correlation_id: record.correlation_id,
                    value,
                    destination: record.destination,
                    deposit_tx: record.deposit_tx,
                };
                warn!(
                    "Transfer {} was never seen on Stacks; guarding against a repeat",
                    guard.correlation_id
                );
                *self.unresolved.write().await = Some(guard.clone());
                Recovery::GuardRestored(guard)
            }
            _ => Recovery::Clean,
        }
    }

    /// Continue an attempt rebuilt by `recover`
    pub async fn resume(self: &Arc<Self>, recovery: Recovery) {
        let Recovery::Resumable {
            awaiting_confirmation,
            remaining_polls,
            ..
        } = recovery
        else {
            return;
        };

        if awaiting_confirmation {
            let deposit_tx = self
                .current
                .read()
                .await
                .as_ref()
                .and_then(|attempt| attempt.deposit_tx);
            let Some(deposit_tx) = deposit_tx else {
                return;
            };

            self.update(|attempt| attempt.state = TransferState::Depositing)
                .await;
            if let Err(error) = self.submitter.await_confirmation(deposit_tx).await {
                self.fail(error).await;
                return;
            }
        }

        self.watch_for_mint(self.poll_policy.with_max_attempts(remaining_polls))
            .await;
    }

    async fn watch_for_mint(&self, policy: RetryPolicy) {
        let Some(attempt) = self
            .update(|attempt| attempt.state = TransferState::Polling)
            .await
        else {
            return;
        };
        let correlation_id = attempt.correlation_id;

        let outcome = poll_until(
            &policy,
            || self.cancel_requested.load(Ordering::SeqCst),
            |_| async move {
                self.update(|attempt| attempt.poll_count += 1).await;
                crate::metrics::record_poll_attempt();
                match self.poller.poll_for_completion(&correlation_id).await {
                    PollStatus::Found { destination_tx } => Some(destination_tx),
                    PollStatus::NotFoundYet => None,
                }
            },
        )
        .await;

        match outcome {
            RetryOutcome::Ready {
                value: destination_tx,
                attempts,
            } => {
                let Some(done) = self
                    .update(|attempt| {
                        attempt.state = TransferState::Success;
                        attempt.destination_tx = Some(destination_tx);
                    })
                    .await
                else {
                    return;
                };

                let latency = (Utc::now() - done.started_at).num_milliseconds() as f64 / 1000.0;
                info!(
                    "Transfer {} minted on Stacks in {:?} after {} polls ({:.1}s)",
                    correlation_id, done.destination_tx, attempts, latency
                );
                crate::metrics::record_transfer_latency(latency);
                crate::metrics::record_transfer_finished(TransferState::Success.as_str());
            }
            RetryOutcome::Exhausted { attempts } => {
                let total = self
                    .current
                    .read()
                    .await
                    .as_ref()
                    .map(|attempt| attempt.poll_count)
                    .unwrap_or(attempts);
                self.fail(TransferError::PollTimeout { attempts: total }).await;
            }
            RetryOutcome::Cancelled { .. } => self.finish_cancelled().await,
        }
    }

    async fn fail(&self, error: TransferError) {
        let soft = error.funds_may_have_moved();
        let message = error.to_string();

        let Some(attempt) = self
            .update(|attempt| {
                attempt.state = TransferState::Error;
                attempt.error = Some(error);
            })
            .await
        else {
            return;
        };

        if soft {
            warn!("Transfer {}: {}", attempt.correlation_id, message);
            if let Some(unresolved) = attempt.unresolved() {
                *self.unresolved.write().await = Some(unresolved);
            }
        } else {
            error!("Transfer {} failed: {}", attempt.correlation_id, message);
        }

        crate::metrics::record_transfer_finished(TransferState::Error.as_str());
    }

    async fn finish_cancelled(&self) {
        let attempt = self.current.write().await.take();
        self.cancel_requested.store(false, Ordering::SeqCst);

        let Some(attempt) = attempt else {
            return;
        };

        self.record(&attempt, PHASE_CANCELLED).await;
        if let Some(unresolved) = attempt.unresolved() {
            warn!(
                "Stopped watching {}; deposit {:?} stands and may still mint",
                attempt.correlation_id, attempt.deposit_tx
            );
            *self.unresolved.write().await = Some(unresolved);
        }

        crate::metrics::record_transfer_finished(PHASE_CANCELLED);
    }

    /// Mutate the active attempt, log state changes and journal the result
    async fn update<F>(&self, apply: F) -> Option<TransferAttempt>
    where
        F: FnOnce(&mut TransferAttempt),
    {
        let attempt = {
            let mut current = self.current.write().await;
            let attempt = current.as_mut()?;
            let before = attempt.state;
            apply(attempt);
            if attempt.state != before {
                info!(
                    "Transfer {}: {} -> {}",
                    attempt.correlation_id, before, attempt.state
                );
            }
            attempt.clone()
        };

        self.record(&attempt, attempt.state.as_str()).await;
        Some(attempt)
    }

    /// Journal failures are logged, never fatal to the transfer
    async fn record(&self, attempt: &TransferAttempt, phase: &str) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal
                .append(&AttemptRecord::from_attempt(attempt, phase))
                .await
            {
                warn!("Failed to journal {} for {}: {}", phase, attempt.correlation_id, e);
            }
        }
    }
}

/// Saga context for one attempt
struct TransferContext {
    orchestrator: Arc<TransferOrchestrator>,
    request: TransferRequest,
    correlation_id: CorrelationId,
    recipient: Option<RemoteRecipient>,
    /// Base units, set by the check step
    value: U256,
}

fn transfer_saga() -> Saga<TransferContext, TransferError> {
    Saga::new()
        .step(CheckStep)
        .step(ApproveStep)
        .step(DepositStep)
}

/// Validate amount and recipient against a fresh balance
struct CheckStep;

#[async_trait]
impl SagaStep<TransferContext, TransferError> for CheckStep {
    fn name(&self) -> &'static str {
        "check"
    }

    async fn execute(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        let orchestrator = Arc::clone(&ctx.orchestrator);

        // Malformed input never reaches the chain
        orchestrator.validator.parse(&ctx.request.amount)?;
        let recipient = address::encode(&ctx.request.destination_address)?;

        let balance = orchestrator
            .chain
            .token_balance(orchestrator.route.token, ctx.request.source_account)
            .await
            .map_err(|e| TransferError::SourceUnavailable(e.to_string()))?;
        let value = orchestrator.validator.validate(&ctx.request.amount, balance)?;

        ctx.value = value;
        ctx.recipient = Some(recipient);
        orchestrator
            .update(|attempt| attempt.value = Some(value))
            .await;
        Ok(())
    }
}

/// Ensure the reserve may pull the amount
struct ApproveStep;

#[async_trait]
impl SagaStep<TransferContext, TransferError> for ApproveStep {
    fn name(&self) -> &'static str {
        "approve"
    }

    async fn execute(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        let orchestrator = Arc::clone(&ctx.orchestrator);
        orchestrator
            .update(|attempt| attempt.state = TransferState::Approving)
            .await;

        let approval = orchestrator
            .allowance
            .ensure_allowance(ctx.request.source_account, orchestrator.route.reserve, ctx.value)
            .await?;

        if let Some(tx_hash) = approval {
            orchestrator
                .update(|attempt| attempt.approval_tx = Some(tx_hash))
                .await;
        }
        Ok(())
    }

    async fn compensate(&self, ctx: &mut TransferContext) {
        // An unspent allowance moves nothing by itself
        info!(
            "Transfer {} stopped after approval; allowance left in place",
            ctx.correlation_id
        );
    }
}

/// Submit `depositToRemote` and wait for source confirmation
struct DepositStep;

#[async_trait]
impl SagaStep<TransferContext, TransferError> for DepositStep {
    fn name(&self) -> &'static str {
        "deposit"
    }

    async fn execute(&self, ctx: &mut TransferContext) -> Result<(), TransferError> {
        let orchestrator = Arc::clone(&ctx.orchestrator);
        orchestrator
            .update(|attempt| attempt.state = TransferState::Depositing)
            .await;

        let recipient = match ctx.recipient {
            Some(recipient) => recipient,
            None => address::encode(&ctx.request.destination_address)?,
        };

        let tx_hash = orchestrator
            .submitter
            .submit_deposit(ctx.value, &recipient, &ctx.correlation_id)
            .await?;
        orchestrator
            .update(|attempt| attempt.deposit_tx = Some(tx_hash))
            .await;

        let confirmation = orchestrator.submitter.await_confirmation(tx_hash).await?;
        info!(
            "Deposit {:?} confirmed in block {} ({} confirmations)",
            tx_hash, confirmation.block_number, confirmation.confirmations
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::TxKind;
    use crate::error::FailureReason;
    use crate::testing::{
        memory_journal, orchestrator, request, FakeSourceChain, ScriptedEvents, DESTINATION,
    };
    use ethers::types::H256;

    fn usdc(whole: u64) -> U256 {
        U256::from(whole) * U256::exp10(6)
    }

    fn dedup_phases(records: &[AttemptRecord]) -> Vec<String> {
        let mut phases: Vec<String> = Vec::new();
        for record in records {
            if phases.last() != Some(&record.phase) {
                phases.push(record.phase.clone());
            }
        }
        phases
    }

    #[tokio::test]
    async fn test_end_to_end_with_approval() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let events = ScriptedEvents::found_on(&chain, 3);
        let journal = memory_journal().await;
        let orchestrator = orchestrator(chain.clone(), events.clone(), Some(journal.clone()));

        let snapshot = orchestrator.run(request(&chain, "50")).await.unwrap();

        assert_eq!(snapshot.state, TransferState::Success);
        assert_eq!(snapshot.poll_count, 3);
        assert!(snapshot.approval_tx.is_some());
        assert!(snapshot.deposit_tx.is_some());
        assert_eq!(snapshot.destination_tx.as_deref(), Some("0xmint"));
        assert_eq!(
            snapshot.destination_explorer_url.as_deref(),
            Some("https://explorer.hiro.so/txid/0xmint?chain=testnet")
        );
        assert_eq!(events.queries(), 3);

        let kinds: Vec<TxKind> = chain.sent().iter().map(|tx| tx.kind).collect();
        assert_eq!(kinds, vec![TxKind::Approval, TxKind::Deposit]);
        assert_eq!(chain.last_deposit().unwrap().value, usdc(50));

        let id = CorrelationId::from_hex(&snapshot.correlation_id.unwrap()).unwrap();
        let history = journal.history(&id).await.unwrap();
        assert_eq!(
            dedup_phases(&history),
            vec!["checking", "approving", "depositing", "polling", "success"]
        );
    }

    #[tokio::test]
    async fn test_sufficient_allowance_skips_approval() {
        let chain = FakeSourceChain::new(usdc(100), usdc(500));
        let events = ScriptedEvents::found_on(&chain, 1);
        let orchestrator = orchestrator(chain.clone(), events, None);

        let snapshot = orchestrator.run(request(&chain, "50")).await.unwrap();

        assert_eq!(snapshot.state, TransferState::Success);
        assert!(snapshot.approval_tx.is_none());
        let kinds: Vec<TxKind> = chain.sent().iter().map(|tx| tx.kind).collect();
        assert_eq!(kinds, vec![TxKind::Deposit]);
    }

    #[tokio::test]
    async fn test_poll_budget_exhausted_is_timeout() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let events = ScriptedEvents::never(&chain);
        let orchestrator = orchestrator(chain.clone(), events.clone(), None);

        let snapshot = orchestrator.run(request(&chain, "50")).await.unwrap();

        assert_eq!(snapshot.state, TransferState::Error);
        assert_eq!(
            snapshot.error_detail,
            Some(TransferError::PollTimeout { attempts: 60 })
        );
        assert_eq!(events.queries(), 60);
        assert!(orchestrator.unresolved().await.is_some());
    }

    #[tokio::test]
    async fn test_insufficient_balance_sends_nothing() {
        let chain = FakeSourceChain::new(usdc(10), U256::zero());
        let events = ScriptedEvents::found_on(&chain, 1);
        let orchestrator = orchestrator(chain.clone(), events.clone(), None);

        let snapshot = orchestrator.run(request(&chain, "50")).await.unwrap();

        assert_eq!(snapshot.state, TransferState::Error);
        assert!(matches!(
            snapshot.error_detail,
            Some(TransferError::InsufficientBalance { .. })
        ));
        assert!(chain.sent().is_empty());
        assert_eq!(events.queries(), 0);
    }

    #[tokio::test]
    async fn test_invalid_input_never_reads_the_chain() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let events = ScriptedEvents::found_on(&chain, 1);
        let orchestrator = orchestrator(chain.clone(), events, None);

        let snapshot = orchestrator.run(request(&chain, "abc")).await.unwrap();
        assert!(matches!(
            snapshot.error_detail,
            Some(TransferError::InvalidAmount(_))
        ));

        orchestrator.reset().await.unwrap();
        let mut bad_address = request(&chain, "50");
        bad_address.destination_address = "not-a-stacks-address".to_string();
        let snapshot = orchestrator.run(bad_address).await.unwrap();
        assert!(matches!(
            snapshot.error_detail,
            Some(TransferError::MalformedAddress(_))
        ));

        assert_eq!(chain.balance_reads(), 0);
    }

    #[tokio::test]
    async fn test_start_while_active_is_rejected_without_mutation() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let events = ScriptedEvents::never(&chain);
        let orchestrator = orchestrator(chain.clone(), events, None);

        let first = orchestrator.start(request(&chain, "50")).await.unwrap();
        let err = orchestrator.start(request(&chain, "75")).await.unwrap_err();

        assert!(matches!(err, BridgeError::TransferInProgress { .. }));
        assert_eq!(orchestrator.snapshot().await, first);
    }

    #[tokio::test]
    async fn test_start_after_terminal_requires_reset() {
        let chain = FakeSourceChain::new(usdc(10), U256::zero());
        let events = ScriptedEvents::never(&chain);
        let orchestrator = orchestrator(chain.clone(), events, None);

        orchestrator.run(request(&chain, "50")).await.unwrap();
        let err = orchestrator.start(request(&chain, "5")).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidStateTransition { .. }));

        orchestrator.reset().await.unwrap();
        assert_eq!(orchestrator.state().await, TransferState::Idle);
        orchestrator.start(request(&chain, "5")).await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_source_account_is_rejected() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let events = ScriptedEvents::never(&chain);
        let orchestrator = orchestrator(chain.clone(), events, None);

        let mut foreign = request(&chain, "50");
        foreign.source_account = ethers::types::Address::repeat_byte(0x99);
        let err = orchestrator.start(foreign).await.unwrap_err();

        assert!(matches!(err, BridgeError::AccountMismatch { .. }));
        assert_eq!(orchestrator.state().await, TransferState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_while_polling_keeps_deposit_and_guards_repeat() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let events = ScriptedEvents::never(&chain).cancel_on(2);
        let orchestrator = orchestrator(chain.clone(), events.clone(), None);
        events.attach(&orchestrator);

        let snapshot = orchestrator.run(request(&chain, "50")).await.unwrap();

        assert_eq!(snapshot.state, TransferState::Idle);
        assert_eq!(events.queries(), 2);
        assert_eq!(chain.sent().len(), 2);

        let guard = orchestrator.unresolved().await.unwrap();
        assert_eq!(guard.value, usdc(50));

        let err = orchestrator.start(request(&chain, "50")).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Transfer(TransferError::PossibleDuplicate { .. })
        ));
        assert_eq!(orchestrator.state().await, TransferState::Idle);

        // A different amount is not the same transfer
        orchestrator.start(request(&chain, "20")).await.unwrap();
        orchestrator.cancel().await.unwrap();
        orchestrator.drive().await;
        assert!(orchestrator.unresolved().await.is_some());

        let mut acknowledged = request(&chain, "50");
        acknowledged.acknowledge_duplicate_risk = true;
        let started = orchestrator.start(acknowledged).await.unwrap();
        assert_eq!(started.state, TransferState::Checking);
        assert_ne!(started.correlation_id, snapshot.correlation_id);
        assert!(orchestrator.unresolved().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_deposit_moves_nothing() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let events = ScriptedEvents::found_on(&chain, 1);
        let orchestrator = orchestrator(chain.clone(), events, None);

        orchestrator.start(request(&chain, "50")).await.unwrap();
        orchestrator.cancel().await.unwrap();
        orchestrator.drive().await;

        assert_eq!(orchestrator.state().await, TransferState::Idle);
        assert!(chain.sent().is_empty());
        assert!(orchestrator.unresolved().await.is_none());
        orchestrator.start(request(&chain, "50")).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_and_reset_rules() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let events = ScriptedEvents::never(&chain);
        let orchestrator = orchestrator(chain.clone(), events, None);

        assert!(matches!(
            orchestrator.cancel().await,
            Err(BridgeError::InvalidStateTransition { .. })
        ));
        orchestrator.reset().await.unwrap();

        orchestrator.start(request(&chain, "50")).await.unwrap();
        assert!(matches!(
            orchestrator.reset().await,
            Err(BridgeError::InvalidStateTransition { .. })
        ));
        assert_eq!(orchestrator.state().await, TransferState::Checking);
    }

    #[tokio::test]
    async fn test_rejected_deposit_is_retryable() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        chain.reject(TxKind::Deposit);
        let events = ScriptedEvents::found_on(&chain, 1);
        let orchestrator = orchestrator(chain.clone(), events, None);

        let snapshot = orchestrator.run(request(&chain, "50")).await.unwrap();

        assert_eq!(snapshot.error_detail, Some(TransferError::DepositRejected));
        assert_eq!(snapshot.error.as_deref(), Some("Transaction rejected by user"));
        assert!(snapshot.deposit_tx.is_none());
        assert!(orchestrator.unresolved().await.is_none());

        orchestrator.reset().await.unwrap();
        orchestrator.start(request(&chain, "50")).await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_confirmation_is_soft() {
        let chain = FakeSourceChain::new(usdc(100), usdc(100));
        chain.fail_confirmations(crate::error::ChainError::Timeout {
            operation: "receipt".into(),
        });
        let events = ScriptedEvents::found_on(&chain, 1);
        let orchestrator = orchestrator(chain.clone(), events.clone(), None);

        let snapshot = orchestrator.run(request(&chain, "50")).await.unwrap();

        let error = snapshot.error_detail.unwrap();
        assert!(matches!(error, TransferError::DepositUnconfirmed { .. }));
        assert!(error.funds_may_have_moved());
        assert!(snapshot.deposit_tx.is_some());
        assert_eq!(events.queries(), 0);
        assert!(orchestrator.unresolved().await.is_some());
    }

    #[tokio::test]
    async fn test_reverted_deposit_is_hard_failure() {
        let chain = FakeSourceChain::new(usdc(100), usdc(100));
        chain.fail_confirmations(crate::error::ChainError::Reverted {
            tx_hash: "0x01".into(),
        });
        let events = ScriptedEvents::found_on(&chain, 1);
        let orchestrator = orchestrator(chain.clone(), events, None);

        let snapshot = orchestrator.run(request(&chain, "50")).await.unwrap();

        assert!(matches!(
            snapshot.error_detail,
            Some(TransferError::DepositFailed(FailureReason::ChainRejected(_)))
        ));
        assert!(orchestrator.unresolved().await.is_none());
    }

    #[tokio::test]
    async fn test_spawned_transfer_completes_in_background() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let events = ScriptedEvents::found_on(&chain, 2);
        let orchestrator = orchestrator(chain.clone(), events, None);

        let started = orchestrator.spawn(request(&chain, "50")).await.unwrap();
        assert_eq!(started.state, TransferState::Checking);

        for _ in 0..200 {
            if orchestrator.state().await.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(orchestrator.state().await, TransferState::Success);
    }

    fn journaled(state: TransferState, chain: &FakeSourceChain) -> TransferAttempt {
        let mut attempt = TransferAttempt::new(request(chain, "50"));
        attempt.state = state;
        attempt.value = Some(usdc(50));
        attempt
    }

    #[tokio::test]
    async fn test_recover_resumes_polling() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let journal = memory_journal().await;

        let mut attempt = journaled(TransferState::Polling, &chain);
        attempt.deposit_tx = Some(H256::repeat_byte(0xde));
        attempt.poll_count = 10;
        journal
            .append(&AttemptRecord::from_attempt(&attempt, "polling"))
            .await
            .unwrap();

        let events = ScriptedEvents::found_on(&chain, 2).watching(attempt.correlation_id);
        let orchestrator = orchestrator(chain.clone(), events.clone(), Some(journal));

        let recovery = orchestrator.recover().await.unwrap();
        assert_eq!(
            recovery,
            Recovery::Resumable {
                correlation_id: attempt.correlation_id,
                awaiting_confirmation: false,
                remaining_polls: 50,
            }
        );

        orchestrator.resume(recovery).await;
        let snapshot = orchestrator.snapshot().await;
        assert_eq!(snapshot.state, TransferState::Success);
        assert_eq!(snapshot.poll_count, 12);
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_recover_waits_for_pending_deposit() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let journal = memory_journal().await;

        let mut attempt = journaled(TransferState::Depositing, &chain);
        attempt.deposit_tx = Some(H256::repeat_byte(0xde));
        journal
            .append(&AttemptRecord::from_attempt(&attempt, "depositing"))
            .await
            .unwrap();

        let events = ScriptedEvents::found_on(&chain, 1).watching(attempt.correlation_id);
        let orchestrator = orchestrator(chain.clone(), events, Some(journal));

        let recovery = orchestrator.recover().await.unwrap();
        assert!(matches!(
            recovery,
            Recovery::Resumable {
                awaiting_confirmation: true,
                remaining_polls: 60,
                ..
            }
        ));

        orchestrator.resume(recovery).await;
        assert_eq!(orchestrator.state().await, TransferState::Success);
        assert_eq!(chain.confirmations_awaited(), vec![H256::repeat_byte(0xde)]);
    }

    #[tokio::test]
    async fn test_recover_closes_attempt_without_deposit() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let journal = memory_journal().await;

        let attempt = journaled(TransferState::Approving, &chain);
        journal
            .append(&AttemptRecord::from_attempt(&attempt, "approving"))
            .await
            .unwrap();

        let events = ScriptedEvents::never(&chain);
        let orchestrator = orchestrator(chain.clone(), events, Some(journal.clone()));

        assert_eq!(
            orchestrator.recover().await.unwrap(),
            Recovery::Interrupted {
                correlation_id: attempt.correlation_id
            }
        );
        let snapshot = orchestrator.snapshot().await;
        assert_eq!(snapshot.error_detail, Some(TransferError::Interrupted));

        let latest = journal.latest().await.unwrap().unwrap();
        assert_eq!(latest.error_kind.as_deref(), Some("interrupted"));

        orchestrator.reset().await.unwrap();
        orchestrator.start(request(&chain, "50")).await.unwrap();
    }

    #[tokio::test]
    async fn test_recover_mid_deposit_guards_repeat() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let journal = memory_journal().await;

        // Crashed between broadcast and recording the hash
        let attempt = journaled(TransferState::Depositing, &chain);
        journal
            .append(&AttemptRecord::from_attempt(&attempt, "depositing"))
            .await
            .unwrap();

        let events = ScriptedEvents::never(&chain);
        let first = orchestrator(chain.clone(), events.clone(), Some(journal.clone()));

        let recovery = first.recover().await.unwrap();
        let Recovery::DepositUncertain(guard) = recovery else {
            panic!("unexpected recovery {:?}", recovery);
        };
        assert_eq!(guard.correlation_id, attempt.correlation_id);
        assert_eq!(guard.value, usdc(50));
        assert!(guard.deposit_tx.is_none());

        let snapshot = first.snapshot().await;
        assert_eq!(snapshot.error_detail, Some(TransferError::DepositOutcomeUnknown));
        let latest = journal.latest().await.unwrap().unwrap();
        assert_eq!(latest.error_kind.as_deref(), Some("deposit_outcome_unknown"));

        first.reset().await.unwrap();
        let err = first.start(request(&chain, "50")).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Transfer(TransferError::PossibleDuplicate { deposit_tx: None, .. })
        ));

        // A second restart still remembers the uncertain deposit
        let restarted = orchestrator(chain.clone(), events, Some(journal));
        let recovery = restarted.recover().await.unwrap();
        assert!(matches!(recovery, Recovery::GuardRestored(ref guard) if guard.deposit_tx.is_none()));

        let mut acknowledged = request(&chain, "50");
        acknowledged.acknowledge_duplicate_risk = true;
        restarted.start(acknowledged).await.unwrap();
        assert!(restarted.unresolved().await.is_none());
    }

    #[tokio::test]
    async fn test_recover_restores_duplicate_guard() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let journal = memory_journal().await;

        let mut attempt = journaled(TransferState::Error, &chain);
        attempt.deposit_tx = Some(H256::repeat_byte(0xde));
        attempt.error = Some(TransferError::PollTimeout { attempts: 60 });
        journal
            .append(&AttemptRecord::from_attempt(&attempt, "error"))
            .await
            .unwrap();

        let events = ScriptedEvents::never(&chain);
        let orchestrator = orchestrator(chain.clone(), events, Some(journal));

        let recovery = orchestrator.recover().await.unwrap();
        assert!(matches!(recovery, Recovery::GuardRestored(ref guard) if guard.destination == DESTINATION));
        assert_eq!(orchestrator.state().await, TransferState::Idle);

        let err = orchestrator.start(request(&chain, "50")).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Transfer(TransferError::PossibleDuplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_recover_without_journal_is_clean() {
        let chain = FakeSourceChain::new(usdc(100), U256::zero());
        let events = ScriptedEvents::never(&chain);
        let orchestrator = orchestrator(chain, events, None);
        assert_eq!(orchestrator.recover().await.unwrap(), Recovery::Clean);
    }
}
