use std::sync::Arc;
use std::time::Duration;

use crate::tags::TagSet;

/// A single observation of a metric, stamped with the elapsed run time.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    timestamp: Duration,
    metric: Arc<str>,
    value: f64,
    tags: TagSet,
}

impl Sample {
    pub fn new(metric: impl Into<Arc<str>>, value: f64) -> Self {
        Self {
            timestamp: Duration::ZERO,
            metric: metric.into(),
            value,
            tags: TagSet::default(),
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }
}
