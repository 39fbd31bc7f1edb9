//! Scenarios and the operations they drive.
//!
//! A [`Scenario`] is an ordered sequence of operation groups. Each pass, a
//! worker walks the groups in declaration order; an unweighted group always
//! runs its operation, a weighted group draws one operation (or nothing,
//! when the group's weights leave probability mass unassigned) from its
//! [`RangeMap`]. Selection within a group is randomized; order across
//! groups is not.
//!
//! Operations are opaque to the engine: they may block, sleep, or do I/O,
//! and they record their own measurements through the
//! [`StatisticsEngine`](crate::stats::StatisticsEngine) in the
//! [`RunContext`].

use std::sync::atomic::{AtomicU8, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RunConfig;
use crate::error::{OpError, TestError};
use crate::selector::RangeMap;
use crate::stats::StatisticsEngine;

/// Where the driving strategy currently is, as observed by operations.
///
/// Strategies flip this to `Beginning` before scheduling work and to
/// `Ending` once scheduling completes, which is not necessarily after
/// in-flight work drains. Operations use it to self-report whether they
/// ran during ramp-down, which matters for coordinated-omission-aware
/// reporting. Purely observational; never gates execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutionState {
    Unstarted = 0,
    Beginning = 1,
    Ending = 2,
}

#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn set(&self, state: ExecutionState) {
        self.0.store(state as u8, Relaxed);
    }

    fn get(&self) -> ExecutionState {
        match self.0.load(Relaxed) {
            1 => ExecutionState::Beginning,
            2 => ExecutionState::Ending,
            _ => ExecutionState::Unstarted,
        }
    }
}

/// Everything an operation gets to see: the statistics engine to record
/// into, the run configuration, and the strategy's execution state.
#[derive(Clone)]
pub struct RunContext {
    stats: Arc<StatisticsEngine>,
    config: Arc<RunConfig>,
    state: Arc<StateCell>,
}

impl RunContext {
    pub(crate) fn new(stats: Arc<StatisticsEngine>, config: Arc<RunConfig>) -> Self {
        RunContext {
            stats,
            config,
            state: Arc::new(StateCell::default()),
        }
    }

    pub fn stats(&self) -> &StatisticsEngine {
        &self.stats
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.state.get()
    }

    pub(crate) fn mark(&self, state: ExecutionState) {
        self.state.set(state);
    }
}

/// One step of a scenario. Opaque to the engine.
#[async_trait]
pub trait Operation: Send + Sync {
    /// The operation name measurements are recorded under.
    fn name(&self) -> &str;

    async fn exec(&self, ctx: &RunContext) -> Result<(), OpError>;
}

/// An operation plus its selection weight and display description.
/// Immutable after construction.
#[derive(Clone)]
pub struct WeightedOperation {
    operation: Arc<dyn Operation>,
    weight: Option<f64>,
    description: String,
}

impl WeightedOperation {
    /// Wraps `operation` with a selection weight in `[0, 1]`.
    pub fn weighted(weight: f64, operation: Arc<dyn Operation>) -> Result<Self, TestError> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(TestError::Configuration(format!(
                "weight {weight} for `{}` is outside [0, 1]",
                operation.name()
            )));
        }
        Ok(WeightedOperation {
            description: operation.name().to_owned(),
            operation,
            weight: Some(weight),
        })
    }

    /// Wraps `operation` to run on every pass, outside any weighted group.
    pub fn unweighted(operation: Arc<dyn Operation>) -> Self {
        WeightedOperation {
            description: operation.name().to_owned(),
            operation,
            weight: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn weight(&self) -> Option<f64> {
        self.weight
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), TestError> {
        self.operation
            .exec(ctx)
            .await
            .map_err(|source| TestError::operation(self.description.clone(), source))
    }
}

enum OperationGroup {
    /// Runs every pass.
    Every(WeightedOperation),
    /// One draw per pass; may select nothing.
    Weighted(RangeMap<WeightedOperation>),
}

/// A named, ordered sequence of operation groups.
pub struct Scenario {
    name: String,
    groups: Vec<OperationGroup>,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl Scenario {
    pub fn named(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.into(),
            groups: Vec::new(),
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Runs one full pass: every group in order, one draw per weighted
    /// group. `seed` feeds the weighted draws, decorrelated per group.
    pub(crate) async fn run_pass(&self, ctx: &RunContext, seed: u64) -> Result<(), TestError> {
        for (index, group) in self.groups.iter().enumerate() {
            match group {
                OperationGroup::Every(op) => op.execute(ctx).await?,
                OperationGroup::Weighted(map) => {
                    let group_seed =
                        seed.wrapping_add((index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
                    if let Some(op) = map.draw(group_seed) {
                        op.execute(ctx).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Builds a [`Scenario`], validating weights eagerly so malformed setups
/// fail at configuration time rather than mid-run.
pub struct ScenarioBuilder {
    name: String,
    groups: Vec<OperationGroup>,
    error: Option<TestError>,
}

impl ScenarioBuilder {
    /// Appends a group whose single operation runs on every pass.
    pub fn exec(mut self, operation: Arc<dyn Operation>) -> Self {
        self.groups
            .push(OperationGroup::Every(WeightedOperation::unweighted(
                operation,
            )));
        self
    }

    /// Appends a weighted group. Weights must each lie in `[0, 1]` and sum
    /// to at most 1.0; unassigned mass becomes the per-pass probability of
    /// selecting nothing from this group.
    pub fn exec_weighted(mut self, operations: Vec<WeightedOperation>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let mut map = RangeMap::new();
        let mut sum = 0.0f64;
        for op in operations {
            let Some(weight) = op.weight() else {
                self.error = Some(TestError::Configuration(format!(
                    "`{}` has no weight; use exec() for unweighted operations",
                    op.description()
                )));
                return self;
            };
            sum += weight;
            map.put(weight, op);
        }
        if sum > 1.0 + 1e-9 {
            self.error = Some(TestError::Configuration(format!(
                "group weights sum to {sum}, which exceeds 1.0"
            )));
            return self;
        }
        self.groups.push(OperationGroup::Weighted(map));
        self
    }

    pub fn build(self) -> Result<Scenario, TestError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.groups.is_empty() {
            return Err(TestError::Configuration(format!(
                "scenario `{}` has no operations",
                self.name
            )));
        }
        Ok(Scenario {
            name: self.name,
            groups: self.groups,
        })
    }
}

/// Built-in pacing step: sleeps for a fixed pause and records nothing.
pub struct NothingFor {
    pause: Duration,
}

impl NothingFor {
    pub fn new(pause: Duration) -> Arc<Self> {
        Arc::new(NothingFor { pause })
    }
}

#[async_trait]
impl Operation for NothingFor {
    fn name(&self) -> &str {
        "nothing-for"
    }

    async fn exec(&self, _ctx: &RunContext) -> Result<(), OpError> {
        tokio::time::sleep(self.pause).await;
        Ok(())
    }
}
