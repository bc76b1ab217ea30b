//! Transfer coordination
//!
//! The orchestrator:
//! 1. Validates a request against a fresh balance
//! 2. Ensures the reserve allowance (approve phase)
//! 3. Submits the deposit and waits for source confirmation
//! 4. Polls Stacks for the mint carrying the correlation id
//!
//! Steps 1-3 run as a saga; step 4 is a bounded retry.

pub mod attempt;
pub mod engine;
pub mod retry;
pub mod saga;

pub use attempt::{
    ExplorerLinks, TransferAttempt, TransferRequest, TransferSnapshot, TransferState,
    UnresolvedTransfer,
};
pub use engine::{OrchestratorConfig, Recovery, TransferOrchestrator};
pub use retry::{poll_until, RetryOutcome, RetryPolicy};
pub use saga::{Saga, SagaOutcome, SagaStep};
