//! Concurrency-ramping strategies.
//!
//! [`Ramp`] interpolates a target concurrency level linearly between
//! `from` and `to` over `during`, re-evaluating at each `every` tick. The
//! per-tick increment is `(to - from) / (during / every)` and the level is
//! accumulated across ticks in floating point; recomputing it from
//! scratch each tick would let rounding drift cancel the ramp.
//!
//! [`Pattern`] generalizes the idea: workers are added or removed one at a
//! time, with the delay before the Nth change given by an arbitrary
//! function of N. [`SineRamp`] is the bundled periodic instance.
//!
//! Unlike the iteration-bounded strategies, a ramp's concurrency level is
//! its own parameter; the run's
//! [`ConcurrencyPlan`](crate::concurrency::ConcurrencyPlan) contributes
//! the drain timeout.

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use typed_builder::TypedBuilder;

use super::{error_channel, first_error, pass_seed, Execution};
use crate::concurrency::{drain, WorkerPool};
use crate::config::RunConfig;
use crate::error::TestError;
use crate::scenario::{ExecutionState, RunContext, Scenario};
use crate::stats::StatisticsEngine;

/// Number of `every` ticks that fit in `during`, at least one.
pub(crate) fn ramp_ticks(during: Duration, every: Duration) -> u64 {
    if every.is_zero() {
        return 1;
    }
    ((during.as_nanos() / every.as_nanos()) as u64).max(1)
}

/// The concurrency level after each tick, accumulated in floating point.
pub(crate) fn ramp_levels(from: u64, to: u64, ticks: u64) -> Vec<f64> {
    let increment = (to as f64 - from as f64) / ticks as f64;
    let mut level = from as f64;
    (0..ticks)
        .map(|_| {
            level += increment;
            level
        })
        .collect()
}

/// Delay before starting the nth worker of a sinusoidal ramp.
pub(crate) fn sine_delay(n: usize, per_thread_delay: Duration) -> Duration {
    per_thread_delay.mul_f64((n as f64).sin() / 2.0 + 0.5)
}

/// Workers that loop the scenario until stopped, added and removed while
/// the ramp runs. Removal stops the most recently added live worker;
/// stopped workers never restart, additions always spawn fresh.
struct LoopingWorkers {
    scenario: Arc<Scenario>,
    ctx: RunContext,
    err_tx: UnboundedSender<TestError>,
    done: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    stops: Vec<Arc<AtomicBool>>,
    live: Vec<usize>,
}

impl LoopingWorkers {
    fn new(
        scenario: Arc<Scenario>,
        ctx: RunContext,
        err_tx: UnboundedSender<TestError>,
    ) -> Self {
        LoopingWorkers {
            scenario,
            ctx,
            err_tx,
            done: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
            stops: Vec::new(),
            live: Vec::new(),
        }
    }

    fn active(&self) -> usize {
        self.live.len()
    }

    fn adjust(&mut self, target: usize) {
        while self.active() < target {
            self.add_one();
        }
        while self.active() > target {
            self.remove_one();
        }
    }

    fn add_one(&mut self) {
        let index = self.handles.len();
        let stop = Arc::new(AtomicBool::new(false));
        let scenario = self.scenario.clone();
        let ctx = self.ctx.clone();
        let err_tx = self.err_tx.clone();
        let done = self.done.clone();
        let own_stop = stop.clone();

        let handle = tokio::spawn(async move {
            tracing::debug!(worker = index, "ramp worker started");
            let mut iteration = 0u64;
            while !done.load(Relaxed) && !own_stop.load(Relaxed) {
                if let Err(err) = scenario.run_pass(&ctx, pass_seed(index, iteration)).await {
                    let _ = err_tx.send(err);
                    break;
                }
                iteration += 1;
            }
            tracing::debug!(worker = index, iteration, "ramp worker stopped");
        });

        self.handles.push(handle);
        self.stops.push(stop);
        self.live.push(index);
    }

    fn remove_one(&mut self) {
        if let Some(index) = self.live.pop() {
            self.stops[index].store(true, Relaxed);
        }
    }

    /// Flips the shared done flag and hands the handles over for draining.
    fn finish(self) -> WorkerPool<()> {
        self.done.store(true, Relaxed);
        WorkerPool::from_handles(self.handles)
    }
}

/// Linear concurrency ramp from `from` to `to` workers over `during`.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct Ramp {
    pub from: u64,
    pub to: u64,
    pub every: Duration,
    pub during: Duration,
}

#[async_trait]
impl Execution for Ramp {
    fn describe(&self) -> String {
        format!(
            "ramp from {} to {} over {:?}, every {:?}",
            self.from, self.to, self.during, self.every
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
        tracing::info!(from = self.from, to = self.to, during = ?self.during, "starting ramp");

        let (err_tx, mut err_rx) = error_channel();
        let mut workers = LoopingWorkers::new(scenario, ctx.clone(), err_tx);
        workers.adjust(self.from as usize);

        let ticks = ramp_ticks(self.during, self.every);
        let increment = (self.to as f64 - self.from as f64) / ticks as f64;
        let mut level = self.from as f64;

        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the immediate tick; the ramp starts at `from`

        for _ in 0..ticks {
            ticker.tick().await;
            level += increment;
            let target = level.round().max(0.0) as usize;
            if target != workers.active() {
                tracing::debug!(level, target, "ramp adjusting");
            }
            workers.adjust(target);
        }

        let pool = workers.finish();
        ctx.mark(ExecutionState::Ending);

        drain(pool, &plan).await?;
        first_error(&mut err_rx)
    }
}

/// Delay function: how long to wait before the nth worker change.
pub type DelayFn = Arc<dyn Fn(usize) -> Duration + Send + Sync>;

/// Ramp that adds (or removes) one worker at a time, pausing `delay(n)`
/// before the nth change, then holds the final level for `hold`.
#[derive(TypedBuilder)]
pub struct Pattern {
    pub from: usize,
    pub to: usize,
    pub delay: DelayFn,
    #[builder(default = Duration::ZERO)]
    pub hold: Duration,
}

#[async_trait]
impl Execution for Pattern {
    fn describe(&self) -> String {
        format!("pattern from {} to {} workers", self.from, self.to)
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
        tracing::info!(from = self.from, to = self.to, "starting pattern ramp");

        let (err_tx, mut err_rx) = error_channel();
        let mut workers = LoopingWorkers::new(scenario, ctx.clone(), err_tx);
        workers.adjust(self.from);

        if self.to >= self.from {
            for n in self.from + 1..=self.to {
                tokio::time::sleep((self.delay)(n)).await;
                workers.adjust(n);
            }
        } else {
            for n in (self.to..self.from).rev() {
                tokio::time::sleep((self.delay)(n + 1)).await;
                workers.adjust(n);
            }
        }

        tokio::time::sleep(self.hold).await;

        let pool = workers.finish();
        ctx.mark(ExecutionState::Ending);

        drain(pool, &plan).await?;
        first_error(&mut err_rx)
    }
}

/// Sinusoidal ramp-up: the delay before the nth worker is
/// `(sin(n) / 2 + 0.5) * per_thread_delay`, so worker arrivals bunch and
/// spread periodically instead of landing on a straight line.
pub struct SineRamp {
    inner: Pattern,
}

impl SineRamp {
    pub fn new(threads: usize, per_thread_delay: Duration, hold: Duration) -> Self {
        SineRamp {
            inner: Pattern::builder()
                .from(0)
                .to(threads)
                .delay(Arc::new(move |n| sine_delay(n, per_thread_delay)) as DelayFn)
                .hold(hold)
                .build(),
        }
    }
}

#[async_trait]
impl Execution for SineRamp {
    fn describe(&self) -> String {
        format!("sine ramp to {} workers", self.inner.to)
    }

    async fn execute(
        &self,
        scenario: Arc<Scenario>,
        config: Arc<RunConfig>,
        stats: Arc<StatisticsEngine>,
    ) -> Result<(), TestError> {
        self.inner.execute(scenario, config, stats).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpError;
    use crate::scenario::Operation;
    use crate::stats::Outcome;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn levels_are_monotonic_and_land_on_target() {
        let levels = ramp_levels(2, 10, 8);
        assert_eq!(levels.len(), 8);
        for pair in levels.windows(2) {
            assert!(pair[1] >= pair[0], "{levels:?}");
        }
        let increment = (10.0 - 2.0) / 8.0;
        assert!((levels[7] - 10.0).abs() <= increment, "{levels:?}");
    }

    #[test]
    fn fractional_increments_accumulate_without_drift() {
        // 3 -> 10 over 9 ticks: increment 7/9 never lands on an integer,
        // but the accumulated level must still reach the target.
        let levels = ramp_levels(3, 10, 9);
        assert!((levels[8] - 10.0).abs() < 1e-9, "{levels:?}");
        for pair in levels.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn down_ramp_levels_descend() {
        let levels = ramp_levels(10, 2, 4);
        for pair in levels.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        assert!((levels[3] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn tick_count_floors_and_never_hits_zero() {
        assert_eq!(
            ramp_ticks(Duration::from_secs(8), Duration::from_secs(1)),
            8
        );
        assert_eq!(
            ramp_ticks(Duration::from_millis(500), Duration::from_secs(1)),
            1
        );
        assert_eq!(ramp_ticks(Duration::from_secs(1), Duration::ZERO), 1);
    }

    #[test]
    fn sine_delay_stays_within_the_period() {
        let per = Duration::from_millis(100);
        for n in 0..50 {
            let d = sine_delay(n, per);
            assert!(d <= per, "n={n} delay={d:?}");
        }
        // sin(0) = 0, so the first worker starts after half a period.
        assert_eq!(sine_delay(0, per), Duration::from_millis(50));
    }

    struct Busy {
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Operation for Busy {
        fn name(&self) -> &str {
            "busy"
        }

        async fn exec(&self, ctx: &RunContext) -> Result<(), OpError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            ctx.stats()
                .record("busy", Duration::from_micros(5), Outcome::OK);
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(())
        }
    }

    fn fixture() -> (Arc<Scenario>, Arc<RunConfig>, Arc<StatisticsEngine>, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        let scenario = Arc::new(
            Scenario::named("busy")
                .exec(Arc::new(Busy {
                    calls: calls.clone(),
                }))
                .build()
                .unwrap(),
        );
        (
            scenario,
            Arc::new(RunConfig::default()),
            Arc::new(StatisticsEngine::new(&[Outcome::OK])),
            calls,
        )
    }

    #[tokio::test]
    async fn ramp_runs_and_drains_cleanly() {
        let (scenario, config, stats, calls) = fixture();
        Ramp::builder()
            .from(1)
            .to(4)
            .every(Duration::from_millis(25))
            .during(Duration::from_millis(100))
            .build()
            .execute(scenario, config, stats)
            .await
            .unwrap();
        assert!(calls.load(std::sync::atomic::Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn pattern_reaches_target_and_stops() {
        let (scenario, config, stats, calls) = fixture();
        Pattern::builder()
            .from(0)
            .to(3)
            .delay(Arc::new(|_| Duration::from_millis(10)) as DelayFn)
            .hold(Duration::from_millis(50))
            .build()
            .execute(scenario, config, stats)
            .await
            .unwrap();
        assert!(calls.load(std::sync::atomic::Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn sine_ramp_is_a_pattern_instance() {
        let (scenario, config, stats, calls) = fixture();
        SineRamp::new(2, Duration::from_millis(10), Duration::from_millis(30))
            .execute(scenario, config, stats)
            .await
            .unwrap();
        assert!(calls.load(std::sync::atomic::Ordering::Relaxed) > 0);
    }
}
