//! Sequential composition of strategies.

use std::sync::Arc;

use async_trait::async_trait;

use super::Execution;
use crate::config::RunConfig;
use crate::error::TestError;
use crate::scenario::Scenario;
use crate::stats::StatisticsEngine;

/// Runs the wrapped strategies in declared order, `times` times over.
/// Purely sequential; each inner strategy owns its own workers.
pub struct Repeat {
    times: usize,
    executions: Vec<Arc<dyn Execution>>,
}

impl Repeat {
    pub fn new(times: usize, executions: Vec<Arc<dyn Execution>>) -> Self {
        Repeat { times, executions }
    }
}

#[async_trait]
impl Execution for Repeat {
    fn describe(&self) -> String {
        let inner: Vec<String> = self.executions.iter().map(|e| e.describe()).collect();
        format!("repeat {} times: [{}]", self.times, inner.join(", "))
    }

    async fn execute(
        &self,
        scenario: Arc<Scenario>,
        config: Arc<RunConfig>,
        stats: Arc<StatisticsEngine>,
    ) -> Result<(), TestError> {
        for round in 0..self.times {
            tracing::debug!(round, "repeat round");
            for execution in &self.executions {
                execution
                    .execute(scenario.clone(), config.clone(), stats.clone())
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpError;
    use crate::execution::AtOnce;
    use crate::scenario::{Operation, RunContext};
    use crate::stats::Outcome;
    use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
    use std::time::Duration;

    struct Counting {
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Operation for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn exec(&self, ctx: &RunContext) -> Result<(), OpError> {
            self.calls.fetch_add(1, Relaxed);
            ctx.stats()
                .record("counting", Duration::from_micros(10), Outcome::OK);
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_inner_strategies_in_order_times_over() {
        let calls = Arc::new(AtomicU64::new(0));
        let scenario = Arc::new(
            Scenario::named("repeat")
                .exec(Arc::new(Counting {
                    calls: calls.clone(),
                }))
                .build()
                .unwrap(),
        );
        let config = Arc::new(RunConfig::default());
        let stats = Arc::new(StatisticsEngine::new(&[Outcome::OK]));

        // 3 rounds of (2 users + 3 occurrences) = 15 passes.
        Repeat::new(
            3,
            vec![Arc::new(AtOnce::new(2)), Arc::new(crate::execution::Times::new(3))],
        )
        .execute(scenario, config, stats)
        .await
        .unwrap();

        assert_eq!(calls.load(Relaxed), 15);
    }

    #[tokio::test]
    async fn zero_rounds_do_nothing() {
        let calls = Arc::new(AtomicU64::new(0));
        let scenario = Arc::new(
            Scenario::named("repeat")
                .exec(Arc::new(Counting {
                    calls: calls.clone(),
                }))
                .build()
                .unwrap(),
        );
        Repeat::new(0, vec![Arc::new(AtOnce::new(5))])
            .execute(
                scenario,
                Arc::new(RunConfig::default()),
                Arc::new(StatisticsEngine::new(&[Outcome::OK])),
            )
            .await
            .unwrap();
        assert_eq!(calls.load(Relaxed), 0);
    }
}
