//! Run-scoped configuration.
//!
//! A [`RunConfig`] travels opaquely through every `execute` call. The engine
//! itself reads only the [`ConcurrencyPlan`](crate::concurrency::ConcurrencyPlan)
//! and, when present, the [`ClientTopology`]; everything else rides along
//! for operations and reporters to look up.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::concurrency::ConcurrencyPlan;
use crate::error::TestError;

/// Position of this harness instance in a coordinated multi-process run.
///
/// The coordination protocol itself (connection handling, barriers, report
/// shipping) lives outside the engine; the engine only divides iteration
/// totals by `client_count` and offsets nothing by `client_index` beyond
/// what the division requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTopology {
    client_count: usize,
    client_index: usize,
}

impl ClientTopology {
    pub fn new(client_count: usize, client_index: usize) -> Result<Self, TestError> {
        if client_count == 0 {
            return Err(TestError::Configuration(
                "client count must be at least 1".into(),
            ));
        }
        if client_index >= client_count {
            return Err(TestError::Configuration(format!(
                "client index {client_index} out of range for {client_count} clients"
            )));
        }
        Ok(Self {
            client_count,
            client_index,
        })
    }

    pub fn client_count(&self) -> usize {
        self.client_count
    }

    pub fn client_index(&self) -> usize {
        self.client_index
    }
}

/// Configuration registry handed to every execution and every operation.
#[derive(TypedBuilder)]
pub struct RunConfig {
    /// Worker sizing and drain timeout.
    #[builder(default = Arc::new(ConcurrencyPlan::default()))]
    pub concurrency: Arc<ConcurrencyPlan>,

    /// Present only for coordinated multi-process runs.
    #[builder(default, setter(strip_option))]
    pub topology: Option<ClientTopology>,

    /// Cadence at which the run glue hands peeks to the reporter.
    #[builder(default = Duration::from_millis(1000))]
    pub report_every: Duration,

    /// Domain-specific configuration instances, looked up by type. The
    /// engine never interprets these.
    #[builder(default, setter(skip))]
    extensions: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig::builder().build()
    }
}

impl RunConfig {
    /// Attaches a domain-specific configuration instance, replacing any
    /// previous instance of the same type.
    pub fn with_extension<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.extensions.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    /// Looks up a domain-specific configuration instance by type.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extensions
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("concurrency", &self.concurrency)
            .field("topology", &self.topology)
            .field("report_every", &self.report_every)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_validates_bounds() {
        assert!(ClientTopology::new(0, 0).is_err());
        assert!(ClientTopology::new(3, 3).is_err());
        let t = ClientTopology::new(3, 2).unwrap();
        assert_eq!(t.client_count(), 3);
        assert_eq!(t.client_index(), 2);
    }

    #[test]
    fn extensions_round_trip_by_type() {
        #[derive(Debug, PartialEq)]
        struct CacheConfig {
            entries: usize,
        }

        let config = RunConfig::default().with_extension(CacheConfig { entries: 512 });
        let fetched = config.extension::<CacheConfig>().unwrap();
        assert_eq!(fetched.entries, 512);
        assert!(config.extension::<String>().is_none());
    }

    #[test]
    fn defaults() {
        let config = RunConfig::default();
        assert_eq!(config.concurrency.workers(), 1);
        assert_eq!(config.report_every, Duration::from_millis(1000));
        assert!(config.topology.is_none());
    }
}
