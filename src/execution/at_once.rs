//! Iteration-bounded strategies.
//!
//! Both strategies here distribute a fixed iteration total across the
//! plan's workers and submit every pass up front: [`AtOnce`] expresses the
//! total as a number of simulated users (one pass each), [`Times`] as a
//! number of whole-scenario occurrences. The distribution itself is the
//! plan's floor-plus-remainder algorithm, computed once and memoized for
//! the duration of the invocation.

use std::sync::Arc;

use async_trait::async_trait;

use super::{error_channel, first_error, pass_seed, Execution};
use crate::concurrency::{drain, WorkerPool};
use crate::config::RunConfig;
use crate::error::TestError;
use crate::scenario::{ExecutionState, RunContext, Scenario};
use crate::stats::StatisticsEngine;

async fn run_distributed(
    label: &str,
    total: u64,
    scenario: Arc<Scenario>,
    config: Arc<RunConfig>,
    stats: Arc<StatisticsEngine>,
) -> Result<(), TestError> {
    let plan = config.concurrency.clone();
    plan.clear();

    let ctx = RunContext::new(stats, config.clone());
    ctx.mark(ExecutionState::Beginning);
    tracing::info!(strategy = label, total, workers = plan.workers(), "starting");

    let (err_tx, mut err_rx) = error_channel();
    let pool = WorkerPool::spawn(plan.workers(), |worker| {
        let iterations = plan.iterations_for_worker(config.topology.as_ref(), worker, total);
        let scenario = scenario.clone();
        let ctx = ctx.clone();
        let err_tx = err_tx.clone();
        async move {
            tracing::debug!(worker, iterations, "worker submitted");
            for iteration in 0..iterations {
                if let Err(err) = scenario.run_pass(&ctx, pass_seed(worker, iteration)).await {
                    let _ = err_tx.send(err);
                    break;
                }
            }
        }
    });
    drop(err_tx);

    // All passes are submitted; in-flight work may still be draining.
    ctx.mark(ExecutionState::Ending);

    drain(pool, &plan).await?;
    first_error(&mut err_rx)
}

/// Runs the scenario once per simulated user, users distributed across
/// the plan's workers.
#[derive(Debug, Clone, Copy)]
pub struct AtOnce {
    users: u64,
}

impl AtOnce {
    pub fn new(users: u64) -> Self {
        AtOnce { users }
    }
}

#[async_trait]
impl Execution for AtOnce {
    fn describe(&self) -> String {
        format!("at once, {} users", self.users)
    }

    async fn execute(
        &self,
        scenario: Arc<Scenario>,
        config: Arc<RunConfig>,
        stats: Arc<StatisticsEngine>,
    ) -> Result<(), TestError> {
        run_distributed("at-once", self.users, scenario, config, stats).await
    }
}

/// Iterates the entire scenario a fixed number of occurrences in total,
/// distributed across the plan's workers.
#[derive(Debug, Clone, Copy)]
pub struct Times {
    occurrences: u64,
}

impl Times {
    pub fn new(occurrences: u64) -> Self {
        Times { occurrences }
    }
}

#[async_trait]
impl Execution for Times {
    fn describe(&self) -> String {
        format!("{} times", self.occurrences)
    }

    async fn execute(
        &self,
        scenario: Arc<Scenario>,
        config: Arc<RunConfig>,
        stats: Arc<StatisticsEngine>,
    ) -> Result<(), TestError> {
        run_distributed("times", self.occurrences, scenario, config, stats).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::ConcurrencyPlan;
    use crate::error::OpError;
    use crate::scenario::Operation;
    use crate::stats::Outcome;
    use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
    use std::time::Duration;

    struct Counting {
        calls: Arc<AtomicU64>,
        fail_after: Option<u64>,
    }

    #[async_trait]
    impl Operation for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn exec(&self, ctx: &RunContext) -> Result<(), OpError> {
            let call = self.calls.fetch_add(1, Relaxed);
            ctx.stats()
                .record("counting", Duration::from_micros(50), Outcome::OK);
            if let Some(limit) = self.fail_after {
                if call >= limit {
                    return Err("failing past the limit".into());
                }
            }
            Ok(())
        }
    }

    fn fixture(
        fail_after: Option<u64>,
        workers: usize,
    ) -> (Arc<Scenario>, Arc<RunConfig>, Arc<StatisticsEngine>, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        let scenario = Scenario::named("fixture")
            .exec(Arc::new(Counting {
                calls: calls.clone(),
                fail_after,
            }))
            .build()
            .unwrap();
        let config = RunConfig::builder()
            .concurrency(Arc::new(
                ConcurrencyPlan::builder().workers(workers).build(),
            ))
            .build();
        let stats = Arc::new(StatisticsEngine::new(&[Outcome::OK]));
        (Arc::new(scenario), Arc::new(config), stats, calls)
    }

    #[tokio::test]
    async fn at_once_runs_every_user_exactly_once() {
        let (scenario, config, stats, calls) = fixture(None, 4);
        AtOnce::new(10)
            .execute(scenario, config, stats.clone())
            .await
            .unwrap();
        assert_eq!(calls.load(Relaxed), 10);
        let peek = stats.peek();
        assert_eq!(peek.peek_for("counting").unwrap().periodic.count, 10);
    }

    #[tokio::test]
    async fn times_distributes_occurrences() {
        let (scenario, config, stats, calls) = fixture(None, 3);
        Times::new(100)
            .execute(scenario, config, stats)
            .await
            .unwrap();
        assert_eq!(calls.load(Relaxed), 100);
    }

    #[tokio::test]
    async fn zero_total_is_a_clean_noop() {
        let (scenario, config, stats, calls) = fixture(None, 4);
        AtOnce::new(0).execute(scenario, config, stats).await.unwrap();
        assert_eq!(calls.load(Relaxed), 0);
    }

    #[tokio::test]
    async fn first_operation_error_is_rethrown_after_drain() {
        let (scenario, config, stats, calls) = fixture(Some(5), 2);
        let err = Times::new(50)
            .execute(scenario, config, stats)
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Operation { .. }), "{err}");
        // Workers stop at their first error, so not all passes ran.
        assert!(calls.load(Relaxed) < 50);
    }

    #[tokio::test]
    async fn hung_operation_hits_the_plan_timeout() {
        struct Hang;

        #[async_trait]
        impl Operation for Hang {
            fn name(&self) -> &str {
                "hang"
            }

            async fn exec(&self, _ctx: &RunContext) -> Result<(), OpError> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        let scenario = Arc::new(
            Scenario::named("hang").exec(Arc::new(Hang)).build().unwrap(),
        );
        let config = Arc::new(
            RunConfig::builder()
                .concurrency(Arc::new(
                    ConcurrencyPlan::builder()
                        .workers(2)
                        .timeout(Duration::from_millis(100))
                        .build(),
                ))
                .build(),
        );
        let stats = Arc::new(StatisticsEngine::new(&[Outcome::OK]));

        let err = AtOnce::new(2)
            .execute(scenario, config, stats)
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Timeout { .. }), "{err}");
    }
}
