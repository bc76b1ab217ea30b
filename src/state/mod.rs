//! Attempt journal with SQLite persistence
//!
//! Append-only snapshots of every transfer attempt, keyed by correlation id,
//! replayed on restart to resume or close out an interrupted attempt.

mod manager;

pub use manager::{AttemptJournal, AttemptRecord, PHASE_CANCELLED};
