use std::time::Duration;

use loadr_metrics::TagSet;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Ordered, validated list of stages driving the target concurrency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunProfile {
    stages: Vec<Stage>,
}

impl RunProfile {
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::EmptyProfile);
        }
        if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(Error::ZeroStageDuration { index });
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Sleep between iterations of one VU. `None` starts the next iteration immediately.
    pub pacing: Option<Duration>,

    /// How often the controller re-reads the schedule and rescales the pool.
    pub tick: Duration,

    /// Cadence of in-run threshold evaluation.
    pub threshold_interval: Duration,

    /// How long to wait for in-flight iterations at shutdown. `None` waits indefinitely.
    pub graceful_stop: Option<Duration>,

    /// Tags attached to every built-in and custom sample.
    pub tags: TagSet,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            pacing: None,
            tick: Duration::from_millis(50),
            threshold_interval: Duration::from_secs(2),
            graceful_stop: None,
            tags: TagSet::default(),
        }
    }
}

impl RunOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("tick", self.tick),
            ("threshold_interval", self.threshold_interval),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidInterval { name, value });
            }
        }
        Ok(())
    }
}
