//! Transfer building blocks
//!
//! Each component covers one step of moving USDC to Stacks:
//! - Address codec for the 32-byte remote recipient
//! - Correlation ids carried as hook data
//! - Pre-flight amount validation
//! - Allowance management (approve phase)
//! - Deposit submission and confirmation
//! - Completion polling on Stacks

pub mod address;
pub mod allowance;
pub mod amount;
pub mod correlation;
pub mod poller;
pub mod submitter;

pub use address::{RemoteRecipient, StacksAddress};
pub use allowance::{AllowanceManager, AllowanceSnapshot};
pub use amount::AmountValidator;
pub use correlation::CorrelationId;
pub use poller::{CompletionPoller, PollStatus};
pub use submitter::TransferSubmitter;
