use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use loadr_metrics::{Registry, Sample};

/// Per-iteration information handed to [`Workload::iterate`].
#[derive(Debug, Clone)]
pub struct IterationContext {
    /// 1-based id of the virtual user, unique for the whole run.
    pub vu_id: u64,
    /// 0-based iteration number within this VU.
    pub iteration: u64,
    /// Time since run start at which the iteration began.
    pub started_at: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: Arc<str>,
    pub passed: bool,
}

/// What an iteration reports back: named checks and any custom samples.
#[derive(Debug, Clone, Default)]
pub struct IterationOutcome {
    pub checks: Vec<Check>,
    pub samples: Vec<Sample>,
}

impl IterationOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, name: impl Into<Arc<str>>, passed: bool) -> &mut Self {
        self.checks.push(Check {
            name: name.into(),
            passed,
        });
        self
    }

    pub fn sample(&mut self, sample: Sample) -> &mut Self {
        self.samples.push(sample);
        self
    }
}

/// A failed iteration. Checks and samples gathered before the failure are still recorded.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct IterationError {
    message: String,
    outcome: IterationOutcome,
}

impl IterationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            outcome: IterationOutcome::default(),
        }
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: IterationOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_outcome(self) -> IterationOutcome {
        self.outcome
    }
}

/// The unit of work every virtual user runs in a loop.
pub trait Workload: Send + Sync + 'static {
    /// Declares custom metrics before any VU starts. Samples for metrics that were
    /// never registered are dropped.
    fn register_metrics(&self, _registry: &Registry) -> loadr_metrics::Result<()> {
        Ok(())
    }

    fn iterate(
        &self,
        ctx: &IterationContext,
    ) -> impl Future<Output = Result<IterationOutcome, IterationError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_keeps_partial_outcome() {
        let mut outcome = IterationOutcome::new();
        outcome
            .check("status is 200", false)
            .sample(Sample::new("http_reqs", 1.0));

        let err = IterationError::new("connection refused").with_outcome(outcome);
        assert_eq!(err.message(), "connection refused");
        assert_eq!(err.to_string(), err.message());

        let outcome = err.into_outcome();
        assert_eq!(outcome.checks.len(), 1);
        assert!(!outcome.checks[0].passed);
        assert_eq!(outcome.samples.len(), 1);
    }
}
