//! Transaction submission with gas estimation and retry

mod gas;
mod sender;

pub use gas::GasEstimator;
pub use sender::TransactionSender;
