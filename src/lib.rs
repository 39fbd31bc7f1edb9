//! Stampede, a programmable load-generation harness for Rust.
//!
//! You assemble a named sequence of weighted operations (a [`Scenario`]),
//! pick one or more temporal execution strategies (run once per user, at a
//! fixed cadence, ramped up over time, repeated), and the harness drives
//! concurrent workers through the scenario while continuously aggregating
//! per-operation counters, latencies, and latency-distribution histograms.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Scenario`]: an ordered sequence of operation groups. Groups execute
//!   in order on every pass; within a weighted group, one operation is
//!   drawn by weight (or none, when the weights leave mass unassigned).
//! - [`Operation`]: one step of a scenario. Opaque to the engine; it may
//!   block or sleep, and it records its own measurements.
//! - [`Execution`]: a temporal execution strategy. The catalogue is
//!   closed: [`AtOnce`], [`Times`], [`InParallel`], [`RunsDuring`],
//!   [`Ramp`], [`Pattern`], [`SineRamp`], [`Repeat`], and [`WarmUp`]
//!   all implement the one `execute` contract and compose freely.
//! - [`ConcurrencyPlan`]: worker sizing, deterministic iteration
//!   distribution across workers (and across coordinated harness
//!   instances), and the drain timeout every strategy enforces.
//! - [`StatisticsEngine`]: per-operation-name counters and latency
//!   accumulators with periodic and cumulative views, plus per-thread
//!   latency histograms. Recording is contention-free; snapshots come out
//!   as immutable [`PeekHolder`]s.
//! - [`Reporter`]: consumes snapshots periodically and once at run end.
//!   Built-ins print text or JSON; richer sinks belong downstream.
//!
//! # Design goals
//!
//! - No hidden shared state: the statistics engine and worker pools are
//!   created per run and threaded through every call, so concurrent runs
//!   in one process cannot observe each other.
//! - A cold hot path: recording a measurement touches atomic counters and
//!   the calling thread's own histogram, never a shared lock.
//! - Deterministic scheduling arithmetic: iteration distribution and
//!   weighted draws are pure functions of their inputs, testable without
//!   spinning up workers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//!
//! use async_trait::async_trait;
//! use stampede::{
//!     AtOnce, OpError, Operation, Outcome, Ramp, Run, RunContext, Scenario,
//!     StdoutReporter, WeightedOperation,
//! };
//!
//! struct Get;
//!
//! #[async_trait]
//! impl Operation for Get {
//!     fn name(&self) -> &str {
//!         "get"
//!     }
//!
//!     async fn exec(&self, ctx: &RunContext) -> Result<(), OpError> {
//!         let start = Instant::now();
//!         // ... talk to the system under test ...
//!         ctx.stats().record("get", start.elapsed(), Outcome::OK);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scenario = Scenario::named("read-heavy")
//!         .exec_weighted(vec![WeightedOperation::weighted(0.8, Arc::new(Get))?])
//!         .build()?;
//!
//!     let run = Run::builder()
//!         .scenario(Arc::new(scenario))
//!         .executions(vec![
//!             Arc::new(AtOnce::new(100)),
//!             Arc::new(
//!                 Ramp::builder()
//!                     .from(1)
//!                     .to(16)
//!                     .every(Duration::from_secs(1))
//!                     .during(Duration::from_secs(30))
//!                     .build(),
//!             ),
//!         ])
//!         .reporter(Arc::new(StdoutReporter))
//!         .build();
//!
//!     run.go().await?;
//!     Ok(())
//! }
//! ```

/// Worker sizing, iteration distribution, pool drain.
pub mod concurrency;
/// Run-scoped configuration registry.
pub mod config;
/// The failure taxonomy.
pub mod error;
/// Temporal execution strategies.
pub mod execution;
/// Reporters for periodic and final snapshots.
pub mod report;
/// Top-level run orchestration.
pub mod run;
/// Scenarios, operations, and execution-state markers.
pub mod scenario;
/// Weighted range selection.
pub mod selector;
/// Concurrent statistics aggregation and snapshots.
pub mod stats;

pub use concurrency::{ConcurrencyPlan, WorkerPool};
pub use config::{ClientTopology, RunConfig};
pub use error::{OpError, TestError};
pub use execution::{
    AtOnce, Execution, InParallel, Pattern, Ramp, Repeat, RunsDuring, SineRamp, Times, WarmUp,
};
pub use report::{JsonReporter, Reporter, StdoutReporter};
pub use run::{Run, DEFAULT_OUTCOMES};
pub use scenario::{
    ExecutionState, NothingFor, Operation, RunContext, Scenario, ScenarioBuilder,
    WeightedOperation,
};
pub use selector::RangeMap;
pub use stats::{
    HistogramSink, Outcome, OutcomePeek, PeekHolder, StatisticsEngine, StatisticsPeek, TotalPeek,
    WindowPeek,
};
