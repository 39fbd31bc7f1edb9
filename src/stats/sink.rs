//! Per-thread latency histograms.
//!
//! The write path must never contend across workers: each recording thread
//! owns one histogram slot, keyed by a thread-affine id handed out on the
//! thread's first record anywhere in the process. Reads (aggregation) fold
//! every live slot into a fresh histogram and never mutate the sources.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;

use dashmap::DashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;

/// One nanosecond up to one hour, three significant figures. Samples past
/// the ceiling are dropped with a warning rather than aborting the run.
const LOWEST_NS: u64 = 1;
const HIGHEST_NS: u64 = 3_600_000_000_000;
const SIGFIGS: u8 = 3;

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Thread-affine slot key, assigned on the thread's first record.
    static THREAD_ID: usize = NEXT_THREAD_ID.fetch_add(1, Relaxed);
}

struct Slot {
    live: AtomicBool,
    histogram: Mutex<Histogram<u64>>,
}

impl Slot {
    fn fresh() -> Arc<Self> {
        Arc::new(Slot {
            live: AtomicBool::new(true),
            histogram: Mutex::new(new_histogram()),
        })
    }
}

fn new_histogram() -> Histogram<u64> {
    // The bounds are compile-time valid, so this cannot fail.
    Histogram::new_with_bounds(LOWEST_NS, HIGHEST_NS, SIGFIGS)
        .expect("static histogram bounds")
}

/// Registry of per-thread histograms with explicit liveness bits.
pub struct HistogramSink {
    slots: DashMap<usize, Arc<Slot>>,
}

impl Default for HistogramSink {
    fn default() -> Self {
        Self::new()
    }
}

impl HistogramSink {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Records a nanosecond value into the calling thread's histogram,
    /// creating it lazily. The slot mutex is uncontended except while an
    /// aggregation is folding this slot.
    pub fn record_value(&self, nanos: u64) {
        let id = THREAD_ID.with(|id| *id);
        let slot = match self.slots.get(&id) {
            Some(slot) if slot.live.load(Relaxed) => slot.clone(),
            // First record on this thread, or the previous slot was
            // marked dead by reset(): start a fresh one.
            _ => {
                let fresh = Slot::fresh();
                self.slots.insert(id, fresh.clone());
                fresh
            }
        };
        let recorded = slot.histogram.lock().record(nanos);
        if let Err(err) = recorded {
            tracing::warn!(nanos, "latency sample outside histogram range: {err}");
        }
    }

    /// Folds every live per-thread histogram into a fresh one. The sources
    /// are never mutated, so recording threads keep writing undisturbed.
    pub fn fetch_aggregate(&self) -> Histogram<u64> {
        let mut aggregate = new_histogram();
        for entry in self.slots.iter() {
            if !entry.live.load(Relaxed) {
                continue;
            }
            let histogram = entry.histogram.lock();
            if let Err(err) = aggregate.add(&*histogram) {
                tracing::warn!("failed to fold thread histogram: {err}");
            }
        }
        aggregate
    }

    /// Marks every registered histogram dead and clears the registry. A
    /// thread whose slot died gets a fresh histogram on its next write.
    pub fn reset(&self) {
        for entry in self.slots.iter() {
            entry.live.store(false, Relaxed);
        }
        self.slots.clear();
    }

    pub fn thread_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_thread_record_and_aggregate() {
        let sink = HistogramSink::new();
        for v in [100u64, 200, 300] {
            sink.record_value(v);
        }
        let agg = sink.fetch_aggregate();
        assert_eq!(agg.len(), 3);
        assert_eq!(agg.min(), 100);
        assert_eq!(agg.max(), 300);
    }

    #[test]
    fn aggregate_matches_single_threaded_recording() {
        // Record the same values through T threads and through one thread;
        // the aggregates must agree on count, min, max, and mean within
        // bucket resolution.
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(42);
        let values: Vec<u64> = (0..4000).map(|_| rng.gen_range(1_000..5_000_000)).collect();

        let reference = HistogramSink::new();
        for &v in &values {
            reference.record_value(v);
        }
        let expected = reference.fetch_aggregate();

        let sink = Arc::new(HistogramSink::new());
        let threads = 4;
        let chunks: Vec<Vec<u64>> = values.chunks(values.len() / threads).map(<[u64]>::to_vec).collect();
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for v in chunk {
                        sink.record_value(v);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let agg = sink.fetch_aggregate();
        assert_eq!(agg.len(), expected.len());
        assert_eq!(agg.min(), expected.min());
        assert_eq!(agg.max(), expected.max());
        assert!((agg.mean() - expected.mean()).abs() < 1.0);
        assert!(sink.thread_count() >= threads);
    }

    #[test]
    fn aggregate_does_not_drain_sources() {
        let sink = HistogramSink::new();
        sink.record_value(500);
        assert_eq!(sink.fetch_aggregate().len(), 1);
        assert_eq!(sink.fetch_aggregate().len(), 1);
    }

    #[test]
    fn reset_excludes_old_data_but_allows_fresh_writes() {
        let sink = HistogramSink::new();
        sink.record_value(500);
        sink.reset();
        assert_eq!(sink.fetch_aggregate().len(), 0);
        sink.record_value(900);
        let agg = sink.fetch_aggregate();
        assert_eq!(agg.len(), 1);
        assert_eq!(agg.min(), 900);
    }

    #[test]
    fn out_of_range_sample_is_dropped_not_fatal() {
        let sink = HistogramSink::new();
        sink.record_value(HIGHEST_NS * 10);
        assert_eq!(sink.fetch_aggregate().len(), 0);
    }
}
