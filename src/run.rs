//! Top-level run orchestration.
//!
//! A [`Run`] ties one scenario to a sequence of execution strategies, a
//! configuration, a statistics engine, and an optional reporter. The
//! statistics engine is owned per run and threaded through every call;
//! nothing is registered process-wide, so concurrent runs in one process
//! stay fully isolated.

use std::sync::Arc;

use tokio::sync::watch;
use typed_builder::TypedBuilder;

use crate::config::RunConfig;
use crate::error::TestError;
use crate::execution::Execution;
use crate::report::Reporter;
use crate::scenario::Scenario;
use crate::stats::{Outcome, StatisticsEngine};

/// Result symbols recorded when the caller does not declare their own.
pub const DEFAULT_OUTCOMES: &[Outcome] = &[Outcome::OK, Outcome::MISS, Outcome::ERROR];

/// One scenario, driven by strategies in declared order.
#[derive(TypedBuilder)]
pub struct Run {
    scenario: Arc<Scenario>,
    executions: Vec<Arc<dyn Execution>>,
    #[builder(default = Arc::new(RunConfig::default()))]
    config: Arc<RunConfig>,
    #[builder(default = Arc::new(StatisticsEngine::new(DEFAULT_OUTCOMES)))]
    stats: Arc<StatisticsEngine>,
    #[builder(default, setter(strip_option))]
    reporter: Option<Arc<dyn Reporter>>,
}

impl Run {
    /// The run's statistics engine; remains peekable after a failed run,
    /// holding everything collected up to the failure point.
    pub fn stats(&self) -> &Arc<StatisticsEngine> {
        &self.stats
    }

    /// Executes every strategy in order. The first strategy error stops
    /// the run and is returned after the reporter's final summary.
    pub async fn go(&self) -> Result<(), TestError> {
        if let Some(reporter) = &self.reporter {
            let mut lines = vec![format!("scenario: {}", self.scenario.name())];
            lines.extend(
                self.executions
                    .iter()
                    .map(|e| format!("execution: {}", e.describe())),
            );
            if let Err(err) = reporter.header(&lines).await {
                tracing::warn!("reporter header failed: {err}");
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let reporting = self.reporter.clone().map(|reporter| {
            let stats = self.stats.clone();
            let every = self.config.report_every;
            let mut stop = stop_rx;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await; // discard the immediate tick
                loop {
                    tokio::select! {
                        _ = async { let _ = stop.wait_for(|stopped| *stopped).await; } => break,
                        _ = ticker.tick() => {
                            let peek = stats.peek();
                            if let Err(err) = reporter.report(&peek).await {
                                tracing::warn!("reporter failed: {err}");
                            }
                        }
                    }
                }
            })
        });

        let mut result = Ok(());
        for execution in &self.executions {
            tracing::info!(execution = %execution.describe(), "executing");
            if let Err(err) = execution
                .execute(
                    self.scenario.clone(),
                    self.config.clone(),
                    self.stats.clone(),
                )
                .await
            {
                result = Err(err);
                break;
            }
        }

        let _ = stop_tx.send(true);
        if let Some(handle) = reporting {
            let _ = handle.await;
        }
        if let Some(reporter) = &self.reporter {
            let peek = self.stats.peek();
            if let Err(err) = reporter.summarize(&peek).await {
                tracing::warn!("reporter summary failed: {err}");
            }
        }
        result
    }
}
