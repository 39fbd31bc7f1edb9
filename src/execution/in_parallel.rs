//! Fixed-cadence execution.
//!
//! Every worker runs the scenario at a steady `every` cadence for a
//! bounded `during` window. The driving task owns the only timer; when the
//! window elapses it flips the stop signal, so cancellation is
//! timer-driven and never blocks on in-flight passes. Errors raised inside
//! a tick cannot propagate out of the tick loop, so they are collected and
//! the first one is re-thrown once every worker has stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use typed_builder::TypedBuilder;

use super::{error_channel, first_error, pass_seed, Execution};
use crate::concurrency::{drain, WorkerPool};
use crate::config::RunConfig;
use crate::error::TestError;
use crate::scenario::{ExecutionState, RunContext, Scenario};
use crate::stats::StatisticsEngine;

/// Schedules the scenario every `every` on each worker for `during`.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct InParallel {
    pub every: Duration,
    pub during: Duration,
}

#[async_trait]
impl Execution for InParallel {
    fn describe(&self) -> String {
        format!(
            "in parallel, every {:?} during {:?}",
            self.every, self.during
        )
    }

    async fn execute(
        &self,
        scenario: Arc<Scenario>,
        config: Arc<RunConfig>,
        stats: Arc<StatisticsEngine>,
    ) -> Result<(), TestError> {
        let plan = config.concurrency.clone();
        let ctx = RunContext::new(stats, config.clone());
        ctx.mark(ExecutionState::Beginning);
        tracing::info!(
            every = ?self.every,
            during = ?self.during,
            workers = plan.workers(),
            "starting cadence run"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let (err_tx, mut err_rx) = error_channel();
        let every = self.every;

        let pool = WorkerPool::spawn(plan.workers(), |worker| {
            let scenario = scenario.clone();
            let ctx = ctx.clone();
            let err_tx = err_tx.clone();
            let mut stop = stop_rx.clone();
            async move {
                let mut ticker = tokio::time::interval(every);
                // A slow pass must not trigger a burst of make-up ticks.
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut iteration = 0u64;
                loop {
                    tokio::select! {
                        _ = async { let _ = stop.wait_for(|stopped| *stopped).await; } => break,
                        _ = ticker.tick() => {
                            if let Err(err) =
                                scenario.run_pass(&ctx, pass_seed(worker, iteration)).await
                            {
                                // Collected, not thrown: the tick loop keeps
                                // its cadence until the timer stops it.
                                let _ = err_tx.send(err);
                            }
                            iteration += 1;
                        }
                    }
                }
                tracing::debug!(worker, iteration, "cadence worker stopped");
            }
        });
        drop(err_tx);

        tokio::time::sleep(self.during).await;
        let _ = stop_tx.send(true);
        ctx.mark(ExecutionState::Ending);

        drain(pool, &plan).await?;
        first_error(&mut err_rx)
    }
}
