//! Warm-up passes.
//!
//! A warm-up drives the scenario exactly like [`RunsDuring`] but records
//! into a discarding statistics engine, so cold-cache and JIT-adjacent
//! latencies never reach the real measurements. The real engine is paused
//! for the duration as well: an operation holding a reference to it from
//! a previous phase cannot leak warm-up samples in.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Execution, RunsDuring};
use crate::config::RunConfig;
use crate::error::TestError;
use crate::scenario::Scenario;
use crate::stats::StatisticsEngine;

/// Duration-bounded pass whose measurements are discarded.
#[derive(Debug, Clone, Copy)]
pub struct WarmUp {
    during: Duration,
}

impl WarmUp {
    pub fn new(during: Duration) -> Self {
        WarmUp { during }
    }
}

#[async_trait]
impl Execution for WarmUp {
    fn describe(&self) -> String {
        format!("warm up for {:?}", self.during)
    }

    async fn execute(
        &self,
        scenario: Arc<Scenario>,
        config: Arc<RunConfig>,
        stats: Arc<StatisticsEngine>,
    ) -> Result<(), TestError> {
        tracing::info!(during = ?self.during, "warming up, measurements discarded");
        stats.pause();
        let discard = Arc::new(StatisticsEngine::discarding());
        let result = RunsDuring::new(self.during)
            .execute(scenario, config, discard)
            .await;
        stats.resume();
        result
    }
}
