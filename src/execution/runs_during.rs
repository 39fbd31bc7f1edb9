//! Duration-bounded free-running execution.
//!
//! Workers loop through the scenario with no iteration bound until a
//! duration timer flips the shared done flag. Shutdown is cooperative: the
//! flag is checked at each pass boundary, and a pass stuck inside an
//! operation is eventually aborted by the drain deadline.

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{error_channel, first_error, pass_seed, Execution};
use crate::concurrency::{drain, WorkerPool};
use crate::config::RunConfig;
use crate::error::TestError;
use crate::scenario::{ExecutionState, RunContext, Scenario};
use crate::stats::StatisticsEngine;

/// Loops the scenario on every worker for a fixed wall-clock window.
#[derive(Debug, Clone, Copy)]
pub struct RunsDuring {
    during: Duration,
}

impl RunsDuring {
    pub fn new(during: Duration) -> Self {
        RunsDuring { during }
    }
}

#[async_trait]
impl Execution for RunsDuring {
    fn describe(&self) -> String {
        format!("running during {:?}", self.during)
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
        tracing::info!(during = ?self.during, workers = plan.workers(), "starting timed run");

        let done = Arc::new(AtomicBool::new(false));
        let (err_tx, mut err_rx) = error_channel();

        let pool = WorkerPool::spawn(plan.workers(), |worker| {
            let scenario = scenario.clone();
            let ctx = ctx.clone();
            let err_tx = err_tx.clone();
            let done = done.clone();
            async move {
                let mut iteration = 0u64;
                while !done.load(Relaxed) {
                    if let Err(err) = scenario.run_pass(&ctx, pass_seed(worker, iteration)).await {
                        let _ = err_tx.send(err);
                        break;
                    }
                    iteration += 1;
                }
                tracing::debug!(worker, iteration, "timed worker stopped");
            }
        });
        drop(err_tx);

        tokio::time::sleep(self.during).await;
        done.store(true, Relaxed);
        ctx.mark(ExecutionState::Ending);

        drain(pool, &plan).await?;
        first_error(&mut err_rx)
    }
}
