use std::time::Duration;

use thiserror::Error;

/// Errors thrown from inside an operation body. Opaque to the harness;
/// the first one collected per run is surfaced, wrapped in
/// [`TestError::Operation`].
pub type OpError = Box<dyn std::error::Error + Send + Sync>;

/// The failure taxonomy of a scenario run.
///
/// Any `Err` returned from [`Execution::execute`](crate::execution::Execution::execute)
/// means "the run did not complete cleanly". Statistics collected up to the
/// failure point remain peekable.
#[derive(Debug, Error)]
pub enum TestError {
    /// A bounded wait (worker drain, future join) exceeded its configured
    /// bound. Fatal to the strategy invocation; never retried.
    #[error("timed out after {elapsed:?} waiting for workers to finish")]
    Timeout { elapsed: Duration },

    /// A worker was cancelled or died abnormally while the strategy was
    /// waiting on it.
    #[error("test aborted: {reason}")]
    Aborted { reason: String },

    /// An error escaped an operation body. Only the first error collected
    /// per strategy invocation is surfaced; reporting the rest is a
    /// reporter concern, not the engine's.
    #[error("operation `{operation}` failed: {source}")]
    Operation {
        operation: String,
        #[source]
        source: OpError,
    },

    /// Malformed scenario or weight setup, detected at build time rather
    /// than at run time.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TestError {
    pub(crate) fn aborted(reason: impl Into<String>) -> Self {
        TestError::Aborted {
            reason: reason.into(),
        }
    }

    pub(crate) fn operation(operation: impl Into<String>, source: OpError) -> Self {
        TestError::Operation {
            operation: operation.into(),
            source,
        }
    }
}
