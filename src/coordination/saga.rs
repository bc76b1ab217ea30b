//! Ordered step executor with reverse-order compensation

use async_trait::async_trait;
use tracing::{debug, info, warn};

/// One step of a saga over context `C`
#[async_trait]
pub trait SagaStep<C, E>: Send + Sync
where
    C: Send,
    E: Send,
{
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut C) -> Result<(), E>;

    /// Undo or neutralise a completed step after a later one failed
    async fn compensate(&self, _ctx: &mut C) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome<E> {
    Completed,
    Failed {
        step: &'static str,
        error: E,
        compensated: Vec<&'static str>,
    },
    /// The stop predicate fired at a step boundary
    Stopped {
        before: &'static str,
        compensated: Vec<&'static str>,
    },
}

pub struct Saga<C, E> {
    steps: Vec<Box<dyn SagaStep<C, E>>>,
}

impl<C, E> Saga<C, E>
where
    C: Send,
    E: Send + std::fmt::Display,
{
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn step(mut self, step: impl SagaStep<C, E> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Run every step in order. `should_stop` is checked before each step.
    pub async fn run<S>(&self, ctx: &mut C, should_stop: S) -> SagaOutcome<E>
    where
        S: Fn() -> bool,
    {
        for (index, step) in self.steps.iter().enumerate() {
            if should_stop() {
                info!("Saga stopped before step {}", step.name());
                let compensated = self.compensate(ctx, index).await;
                return SagaOutcome::Stopped {
                    before: step.name(),
                    compensated,
                };
            }

            debug!("Saga step {} starting", step.name());
            if let Err(error) = step.execute(ctx).await {
                warn!("Saga step {} failed: {}", step.name(), error);
                let compensated = self.compensate(ctx, index).await;
                return SagaOutcome::Failed {
                    step: step.name(),
                    error,
                    compensated,
                };
            }
        }

        SagaOutcome::Completed
    }

    /// Compensate steps `[0, completed)` newest first
    async fn compensate(&self, ctx: &mut C, completed: usize) -> Vec<&'static str> {
        let mut compensated = Vec::with_capacity(completed);
        for step in self.steps[..completed].iter().rev() {
            step.compensate(ctx).await;
            compensated.push(step.name());
        }
        compensated
    }
}

impl<C, E> Default for Saga<C, E>
where
    C: Send,
    E: Send + std::fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}
