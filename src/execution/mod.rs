//! Temporal execution strategies.
//!
//! A strategy decides *when* scenario passes happen: all at once, at a
//! fixed cadence, ramped over time, repeated. The catalogue is closed and
//! every entry implements the one [`Execution`] contract, so strategies
//! compose (see [`Repeat`]) and callers dispatch through trait objects.
//!
//! # Lifecycle
//!
//! Every strategy moves through the same states: it provisions a fresh
//! worker pool sized from the run's
//! [`ConcurrencyPlan`](crate::concurrency::ConcurrencyPlan), runs workers
//! at its own cadence, signals draining (by duration timer or explicit
//! stop flag, never both in one strategy), and then awaits termination
//! under the plan's timeout. The drain deadline is always enforced and a
//! miss is fatal [`TestError::Timeout`]; pools never outlive their
//! `execute` call.
//!
//! Before scheduling any work a strategy marks the run context
//! [`ExecutionState::Beginning`](crate::scenario::ExecutionState); once
//! scheduling completes (in-flight passes may still be draining) it marks
//! [`ExecutionState::Ending`](crate::scenario::ExecutionState).
//!
//! # Error discipline
//!
//! Worker loops cannot propagate directly, so every strategy drops errors
//! into an unbounded channel and, after all workers stop, re-throws the
//! first one collected. Later errors are dropped here; surfacing all of
//! them is a reporter concern.

mod at_once;
mod in_parallel;
mod ramp;
mod repeat;
mod runs_during;
mod warmup;

pub use at_once::{AtOnce, Times};
pub use in_parallel::InParallel;
pub use ramp::{Pattern, Ramp, SineRamp};
pub use repeat::Repeat;
pub use runs_during::RunsDuring;
pub use warmup::WarmUp;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::RunConfig;
use crate::error::TestError;
use crate::scenario::Scenario;
use crate::stats::StatisticsEngine;

/// One temporal execution pattern.
#[async_trait]
pub trait Execution: Send + Sync {
    /// Human-readable form for report headers and logs.
    fn describe(&self) -> String;

    /// Drives workers through the scenario. Returns only after every
    /// worker this invocation spawned has finished or been aborted.
    async fn execute(
        &self,
        scenario: Arc<Scenario>,
        config: Arc<RunConfig>,
        stats: Arc<StatisticsEngine>,
    ) -> Result<(), TestError>;
}

/// Seed for one scenario pass: stable per (worker, iteration) so weighted
/// draws are reproducible and uncorrelated across workers.
pub(crate) fn pass_seed(worker: usize, iteration: u64) -> u64 {
    (worker as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(iteration)
}

/// First-error-wins collection channel for worker loops.
pub(crate) fn error_channel() -> (
    mpsc::UnboundedSender<TestError>,
    mpsc::UnboundedReceiver<TestError>,
) {
    mpsc::unbounded_channel()
}

/// Drains the error channel after workers stopped; the first collected
/// error is surfaced, the rest are left to reporters.
pub(crate) fn first_error(rx: &mut mpsc::UnboundedReceiver<TestError>) -> Result<(), TestError> {
    match rx.try_recv() {
        Ok(err) => Err(err),
        Err(_) => Ok(()),
    }
}
