//! Worker sizing, iteration distribution, and pool lifecycle.
//!
//! A [`ConcurrencyPlan`] answers two questions for every strategy:
//! how many workers run, and how many scenario passes each worker owes for
//! a given iteration total. The per-worker assignment is computed once per
//! total and memoized; strategies call [`ConcurrencyPlan::clear`] before
//! distributing a fresh total.
//!
//! [`WorkerPool`] wraps the tasks a strategy spawns for one `execute`
//! invocation. Pools are provisioned fresh per invocation and fully torn
//! down by [`WorkerPool::await_completion`], which enforces the plan's
//! drain timeout: on deadline every remaining worker is aborted and the
//! caller gets [`TestError::Timeout`]. Nothing is shared between
//! successive runs.
//!
//! # Distribution algorithm
//!
//! For `total` iterations over `workers` workers, optionally divided
//! first across `client_count` coordinated harness instances:
//!
//! ```text
//! total_for_client = total / client_count      (warn if not divisible)
//! base             = total_for_client / workers
//! remainder        = total_for_client - base * workers
//! ```
//!
//! Every worker gets `base`; the remainder is handed out one unit at a
//! time starting at worker 0. Assignments therefore differ by at most one,
//! and lower indices take the extra units first.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use typed_builder::TypedBuilder;

use crate::config::ClientTopology;
use crate::error::TestError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct Assignment {
    total: u64,
    per_worker: Vec<u64>,
}

/// Worker count and drain timeout for one run, plus the iteration memo.
#[derive(Debug, TypedBuilder)]
pub struct ConcurrencyPlan {
    #[builder(default = 1)]
    workers: usize,
    #[builder(default = DEFAULT_TIMEOUT)]
    timeout: Duration,
    #[builder(default, setter(skip))]
    memo: Mutex<Option<Assignment>>,
}

impl Default for ConcurrencyPlan {
    fn default() -> Self {
        ConcurrencyPlan::builder().build()
    }
}

impl ConcurrencyPlan {
    /// A plan sized to the host's logical CPU count.
    pub fn auto() -> Self {
        ConcurrencyPlan::builder().workers(num_cpus::get()).build()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of scenario passes worker `worker_index` owes for `total`.
    ///
    /// The full assignment vector is built under the memo lock on first
    /// access and reused afterwards. A later call with a different total
    /// keeps returning the memoized assignment: recomputing mid-run would
    /// break the conservation invariant for workers that already read
    /// their share. Call [`clear`](Self::clear) between totals.
    pub fn iterations_for_worker(
        &self,
        topology: Option<&ClientTopology>,
        worker_index: usize,
        total: u64,
    ) -> u64 {
        let mut memo = self.memo.lock();
        let assignment = memo.get_or_insert_with(|| Assignment {
            total,
            per_worker: self.distribute(topology, total),
        });
        if assignment.total != total {
            tracing::debug!(
                memoized = assignment.total,
                requested = total,
                "iteration memo already built for a different total; \
                 returning the memoized assignment (clear() between totals)"
            );
        }
        assignment.per_worker.get(worker_index).copied().unwrap_or(0)
    }

    /// Drops the memoized assignment so the next access distributes anew.
    pub fn clear(&self) {
        *self.memo.lock() = None;
    }

    fn distribute(&self, topology: Option<&ClientTopology>, total: u64) -> Vec<u64> {
        let total_for_client = match topology {
            Some(t) => {
                let count = t.client_count() as u64;
                if total % count != 0 {
                    tracing::warn!(
                        total,
                        clients = count,
                        "iteration total does not divide evenly across clients; \
                         {} iterations will not run",
                        total % count
                    );
                }
                total / count
            }
            None => total,
        };

        let workers = self.workers.max(1) as u64;
        let base = total_for_client / workers;
        let remainder = total_for_client - base * workers;

        (0..workers)
            .map(|i| if i < remainder { base + 1 } else { base })
            .collect()
    }
}

/// The workers one strategy invocation spawned, joined exactly once.
pub struct WorkerPool<T> {
    handles: Vec<JoinHandle<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawns `workers` tasks, one per worker index.
    pub fn spawn<F, Fut>(workers: usize, mut make: F) -> Self
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        let handles = (0..workers).map(|i| tokio::spawn(make(i))).collect();
        Self { handles }
    }

    /// Wraps handles spawned elsewhere (ramp strategies add workers
    /// incrementally rather than all up front).
    pub fn from_handles(handles: Vec<JoinHandle<T>>) -> Self {
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Blocks until every worker completes or `timeout` elapses.
    ///
    /// On timeout every remaining worker is aborted before
    /// [`TestError::Timeout`] is returned, so no work leaks past the
    /// deadline. A worker that was cancelled or panicked surfaces as
    /// [`TestError::Aborted`].
    pub async fn await_completion(self, timeout: Duration) -> Result<Vec<T>, TestError> {
        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();

        let joined = match tokio::time::timeout(timeout, join_all(self.handles)).await {
            Ok(joined) => joined,
            Err(_) => {
                for abort in &aborts {
                    abort.abort();
                }
                return Err(TestError::Timeout { elapsed: timeout });
            }
        };

        let mut outputs = Vec::with_capacity(joined.len());
        for result in joined {
            match result {
                Ok(value) => outputs.push(value),
                Err(err) if err.is_cancelled() => {
                    return Err(TestError::aborted("worker cancelled while draining"));
                }
                Err(err) => {
                    tracing::error!("worker panicked: {err}");
                    return Err(TestError::aborted(format!("worker panicked: {err}")));
                }
            }
        }
        Ok(outputs)
    }
}

/// Convenience wrapper pairing a pool with the plan's timeout.
pub(crate) async fn drain<T: Send + 'static>(
    pool: WorkerPool<T>,
    plan: &Arc<ConcurrencyPlan>,
) -> Result<Vec<T>, TestError> {
    pool.await_completion(plan.timeout()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(workers: usize) -> ConcurrencyPlan {
        ConcurrencyPlan::builder().workers(workers).build()
    }

    #[test]
    fn conservation_and_spread() {
        for workers in 1..=8usize {
            for total in [0u64, 1, 7, 10, 64, 1001] {
                let p = plan(workers);
                let assigned: Vec<u64> = (0..workers)
                    .map(|i| p.iterations_for_worker(None, i, total))
                    .collect();
                assert_eq!(assigned.iter().sum::<u64>(), total, "{workers}w/{total}");
                let max = *assigned.iter().max().unwrap();
                let min = *assigned.iter().min().unwrap();
                assert!(max - min <= 1, "{workers}w/{total}: {assigned:?}");
            }
        }
    }

    #[test]
    fn remainder_goes_to_low_indices() {
        let p = plan(4);
        let assigned: Vec<u64> = (0..4).map(|i| p.iterations_for_worker(None, i, 10)).collect();
        assert_eq!(assigned, vec![3, 3, 2, 2]);
    }

    #[test]
    fn distributed_division() {
        for client in 0..3 {
            let topology = ClientTopology::new(3, client).unwrap();
            let p = plan(4);
            let assigned: Vec<u64> = (0..4)
                .map(|i| p.iterations_for_worker(Some(&topology), i, 12))
                .collect();
            assert_eq!(assigned, vec![1, 1, 1, 1], "client {client}");
        }
    }

    #[test]
    fn memo_survives_conflicting_totals_until_cleared() {
        let p = plan(2);
        assert_eq!(p.iterations_for_worker(None, 0, 10), 5);
        // Different total without clear(): memoized assignment wins.
        assert_eq!(p.iterations_for_worker(None, 0, 100), 5);
        p.clear();
        assert_eq!(p.iterations_for_worker(None, 0, 100), 50);
    }

    #[test]
    fn out_of_range_worker_owes_nothing() {
        let p = plan(2);
        assert_eq!(p.iterations_for_worker(None, 7, 10), 0);
    }

    #[tokio::test]
    async fn pool_collects_outputs() {
        let pool = WorkerPool::spawn(4, |i| async move { i * 2 });
        let mut outputs = pool
            .await_completion(Duration::from_secs(5))
            .await
            .unwrap();
        outputs.sort_unstable();
        assert_eq!(outputs, vec![0, 2, 4, 6]);
    }

    #[tokio::test]
    async fn pool_times_out_and_aborts() {
        let pool = WorkerPool::spawn(2, |_| async {
            std::future::pending::<()>().await;
        });
        let err = pool
            .await_completion(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Timeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn pool_surfaces_worker_panic_as_abort() {
        let pool = WorkerPool::spawn(1, |_| async {
            panic!("boom");
        });
        let err = pool
            .await_completion(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Aborted { .. }), "{err}");
    }
}
