//! Immutable statistics snapshots.
//!
//! A peek is taken per operation name under that name's lock: the periodic
//! accumulators fold into the cumulative ones and reset in the same
//! critical section, so every per-name snapshot is internally consistent.
//! Snapshots across names are taken moments apart and are not mutually
//! synchronized; the "ALL" row is an arithmetic combination of them, which
//! is an accepted approximation rather than a bug.

use serde::Serialize;

use super::Outcome;

/// Counters and derived metrics for one window (periodic or cumulative).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowPeek {
    pub count: u64,
    pub total_latency_ns: u64,
    /// Transactions per second over the window. Zero when the window is
    /// shorter than a second, to avoid noisy spikes.
    pub tps: f64,
    /// Mean latency in milliseconds; zero when the window saw no samples.
    pub average_latency_ms: f64,
}

impl WindowPeek {
    pub(crate) fn derive(count: u64, total_latency_ns: u64, window_secs: f64) -> Self {
        let tps = if window_secs < 1.0 {
            0.0
        } else {
            count as f64 / window_secs
        };
        let average_latency_ms = if count == 0 {
            0.0
        } else {
            total_latency_ns as f64 / count as f64 / 1e6
        };
        WindowPeek {
            count,
            total_latency_ns,
            tps,
            average_latency_ms,
        }
    }

}

/// One result symbol's periodic and cumulative view under one name.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomePeek {
    pub outcome: Outcome,
    pub periodic: WindowPeek,
    pub cumulative: WindowPeek,
}

/// Point-in-time snapshot of one operation name.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsPeek {
    pub name: String,
    pub rows: Vec<OutcomePeek>,
    /// Totals across all result symbols.
    pub periodic: WindowPeek,
    pub cumulative: WindowPeek,
}

impl StatisticsPeek {
    pub fn row(&self, outcome: Outcome) -> Option<&OutcomePeek> {
        self.rows.iter().find(|r| r.outcome == outcome)
    }
}

/// The cross-name "ALL" row.
///
/// Counters and TPS are summed across names. Latency is the unweighted
/// average of the per-name average latencies, NOT a counter-weighted
/// average; that is not latency-correct for heterogeneous mixes, but
/// existing report consumers depend on this exact formula, so it is
/// reproduced as-is.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TotalPeek {
    pub periodic: WindowPeek,
    pub cumulative: WindowPeek,
}

/// Every per-name peek taken in one sweep, plus the derived total.
#[derive(Debug, Clone, Serialize)]
pub struct PeekHolder {
    pub peeks: Vec<StatisticsPeek>,
    pub total: TotalPeek,
}

impl PeekHolder {
    pub(crate) fn assemble(peeks: Vec<StatisticsPeek>) -> Self {
        let total = TotalPeek {
            periodic: combine(peeks.iter().map(|p| &p.periodic)),
            cumulative: combine(peeks.iter().map(|p| &p.cumulative)),
        };
        PeekHolder { peeks, total }
    }

    pub fn peek_for(&self, name: &str) -> Option<&StatisticsPeek> {
        self.peeks.iter().find(|p| p.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.peeks.is_empty()
    }
}

fn combine<'p>(windows: impl Iterator<Item = &'p WindowPeek>) -> WindowPeek {
    let mut count = 0u64;
    let mut total_latency_ns = 0u64;
    let mut tps = 0.0f64;
    let mut average_sum = 0.0f64;
    let mut averaged_names = 0u64;

    for w in windows {
        count += w.count;
        total_latency_ns += w.total_latency_ns;
        tps += w.tps;
        if w.count > 0 {
            average_sum += w.average_latency_ms;
            averaged_names += 1;
        }
    }

    WindowPeek {
        count,
        total_latency_ns,
        tps,
        average_latency_ms: if averaged_names == 0 {
            0.0
        } else {
            average_sum / averaged_names as f64
        },
    }
}
