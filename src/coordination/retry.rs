//! Bounded retry combinator
//!
//! `poll_until` runs a check up to `max_attempts` times, sleeping between
//! attempts per the policy, and stops early on a value or a cancel request.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed,
    Exponential { multiplier: f64, max_interval: Duration },
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of checks, including the first
    pub max_attempts: u32,
    /// Delay after the first failed check
    pub interval: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Fixed,
        }
    }

    /// Doubling-style delays capped at `max_interval`
    pub fn exponential(
        max_attempts: u32,
        interval: Duration,
        multiplier: f64,
        max_interval: Duration,
    ) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Exponential {
                multiplier,
                max_interval,
            },
        }
    }

    /// Same cadence with a different attempt budget
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self.clone()
        }
    }

    /// Delay after check number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential {
                multiplier,
                max_interval,
            } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let secs = self.interval.as_secs_f64() * multiplier.powi(exponent);
                Duration::from_secs_f64(secs.min(max_interval.as_secs_f64()))
            }
        }
    }

    /// Longest time spent sleeping before giving up
    pub fn window(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Ready { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Run `check` until it yields a value, the budget runs out, or `cancelled`
/// reports true. The first check runs immediately; `cancelled` is consulted
/// before every check, never during one.
pub async fn poll_until<T, C, F, Fut>(
    policy: &RetryPolicy,
    mut cancelled: C,
    mut check: F,
) -> RetryOutcome<T>
where
    C: FnMut() -> bool,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        if cancelled() {
            return RetryOutcome::Cancelled { attempts };
        }

        attempts += 1;
        if let Some(value) = check(attempts).await {
            return RetryOutcome::Ready { value, attempts };
        }

        if attempts < policy.max_attempts {
            sleep(policy.delay_for_attempt(attempts)).await;
        }
    }

    RetryOutcome::Exhausted { attempts }
}
