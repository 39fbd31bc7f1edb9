//! Concurrent statistics aggregation.
//!
//! The write path is the hot path: every worker iteration records one
//! measurement, and many workers record concurrently. Recording therefore
//! touches only per-outcome atomic counters and the calling thread's own
//! histogram; there is no shared lock anywhere on that path. The only
//! locks are per-name, taken by [`StatisticsEngine::peek`] to make the
//! periodic-to-cumulative fold and the periodic reset atomic per name.
//!
//! Statistics live per distinct operation name, created on first use and
//! kept for the whole run. A peek resets every periodic window; cumulative
//! accumulators never reset within a run.

mod peek;
mod sink;

pub use peek::{OutcomePeek, PeekHolder, StatisticsPeek, TotalPeek, WindowPeek};
pub use sink::HistogramSink;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

/// A result symbol: the outcome label of one operation execution.
///
/// An open enumeration; [`Outcome::OK`], [`Outcome::MISS`] and
/// [`Outcome::ERROR`] cover the common cases and callers mint their own
/// with [`Outcome::new`]. The set a run records under is declared when the
/// engine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Outcome(&'static str);

impl Outcome {
    pub const OK: Outcome = Outcome("OK");
    pub const MISS: Outcome = Outcome("MISS");
    pub const ERROR: Outcome = Outcome("ERROR");

    pub const fn new(label: &'static str) -> Self {
        Outcome(label)
    }

    pub fn label(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Periodic and cumulative accumulators for one outcome under one name.
#[derive(Debug, Default)]
struct Slot {
    periodic_count: AtomicU64,
    periodic_latency_ns: AtomicU64,
    cumulative_count: AtomicU64,
    cumulative_latency_ns: AtomicU64,
}

/// All accumulators for one operation name.
pub struct Statistics {
    slots: Vec<(Outcome, Slot)>,
    sink: HistogramSink,
    /// Guards the fold-and-reset in `peek`; never taken by `record`.
    peek_lock: Mutex<Instant>,
    created: Instant,
}

impl Statistics {
    fn new(outcomes: &[Outcome], now: Instant) -> Self {
        Statistics {
            slots: outcomes.iter().map(|&o| (o, Slot::default())).collect(),
            sink: HistogramSink::new(),
            peek_lock: Mutex::new(now),
            created: now,
        }
    }

    fn record(&self, elapsed_ns: u64, outcome: Outcome) {
        let Some((_, slot)) = self.slots.iter().find(|(o, _)| *o == outcome) else {
            tracing::warn!(%outcome, "undeclared result symbol; sample dropped");
            return;
        };
        slot.periodic_count.fetch_add(1, Relaxed);
        slot.periodic_latency_ns.fetch_add(elapsed_ns, Relaxed);
        self.sink.record_value(elapsed_ns);
    }

    /// Folds periodic into cumulative, resets the periodic window, and
    /// returns the snapshot. The fold and the reset happen together under
    /// the per-name lock so the snapshot is internally consistent.
    fn peek(&self, name: &str, now: Instant) -> StatisticsPeek {
        let mut last_peek = self.peek_lock.lock();
        let window_secs = now.duration_since(*last_peek).as_secs_f64();
        let lifetime_secs = now.duration_since(self.created).as_secs_f64();
        *last_peek = now;

        let mut rows = Vec::with_capacity(self.slots.len());
        let mut periodic_count = 0u64;
        let mut periodic_latency = 0u64;
        let mut cumulative_count = 0u64;
        let mut cumulative_latency = 0u64;

        for (outcome, slot) in &self.slots {
            let count = slot.periodic_count.swap(0, Relaxed);
            let latency = slot.periodic_latency_ns.swap(0, Relaxed);
            let cum_count = slot.cumulative_count.fetch_add(count, Relaxed) + count;
            let cum_latency = slot.cumulative_latency_ns.fetch_add(latency, Relaxed) + latency;

            periodic_count += count;
            periodic_latency += latency;
            cumulative_count += cum_count;
            cumulative_latency += cum_latency;

            rows.push(OutcomePeek {
                outcome: *outcome,
                periodic: WindowPeek::derive(count, latency, window_secs),
                cumulative: WindowPeek::derive(cum_count, cum_latency, lifetime_secs),
            });
        }

        StatisticsPeek {
            name: name.to_owned(),
            rows,
            periodic: WindowPeek::derive(periodic_count, periodic_latency, window_secs),
            cumulative: WindowPeek::derive(cumulative_count, cumulative_latency, lifetime_secs),
        }
    }
}

/// Per-run statistics registry, threaded explicitly through every call.
///
/// One engine per run; there is no process-wide registry, so concurrent
/// runs in one process cannot observe each other's numbers.
pub struct StatisticsEngine {
    statistics: DashMap<String, Arc<Statistics>>,
    outcomes: Vec<Outcome>,
    paused: AtomicBool,
    discard: bool,
}

impl StatisticsEngine {
    /// An engine recording under the declared result symbols.
    pub fn new(outcomes: &[Outcome]) -> Self {
        StatisticsEngine {
            statistics: DashMap::new(),
            outcomes: outcomes.to_vec(),
            paused: AtomicBool::new(false),
            discard: false,
        }
    }

    /// An engine that drops everything. Warm-up passes run against one of
    /// these so ramp-up latencies never pollute real measurements.
    pub fn discarding() -> Self {
        StatisticsEngine {
            statistics: DashMap::new(),
            outcomes: Vec::new(),
            paused: AtomicBool::new(false),
            discard: true,
        }
    }

    /// Records one measurement. Never blocks on a shared lock and never
    /// panics; this is the hot path.
    pub fn record(&self, name: &str, elapsed: Duration, outcome: Outcome) {
        if self.discard || self.paused.load(Relaxed) {
            return;
        }
        let elapsed_ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        if let Some(stats) = self.statistics.get(name) {
            stats.record(elapsed_ns, outcome);
            return;
        }
        let stats = self
            .statistics
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Statistics::new(&self.outcomes, Instant::now())))
            .clone();
        stats.record(elapsed_ns, outcome);
    }

    /// Snapshots every known name and derives the "ALL" total.
    pub fn peek(&self) -> PeekHolder {
        let now = Instant::now();
        let mut names: Vec<String> = self.statistics.iter().map(|e| e.key().clone()).collect();
        names.sort();

        let peeks = names
            .iter()
            .filter_map(|name| {
                self.statistics
                    .get(name)
                    .map(|stats| stats.peek(name, now))
            })
            .collect();
        PeekHolder::assemble(peeks)
    }

    /// Aggregated latency histogram for one name, folded fresh per call.
    pub fn histogram(&self, name: &str) -> Option<Histogram<u64>> {
        self.statistics
            .get(name)
            .map(|stats| stats.sink.fetch_aggregate())
    }

    /// Drops per-thread histograms for every name (liveness sweep).
    pub fn reset_histograms(&self) {
        for entry in self.statistics.iter() {
            entry.sink.reset();
        }
    }

    /// Pauses recording; records are dropped until `resume`.
    pub fn pause(&self) {
        self.paused.store(true, Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Relaxed)
    }

    pub fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.statistics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
