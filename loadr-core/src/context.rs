use std::sync::Arc;
use std::time::Duration;

use loadr_metrics::{Registry, TagSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::metrics::BuiltinMetrics;

/// State shared by everything taking part in one run.
#[derive(Debug)]
pub struct RunContext {
    started: Instant,
    registry: Arc<Registry>,
    metrics: BuiltinMetrics,
    cancel: CancellationToken,
    tags: TagSet,
}

impl RunContext {
    /// Registers the built-in metrics and starts the run clock.
    pub fn new(registry: Arc<Registry>, tags: TagSet, cancel: CancellationToken) -> Result<Self> {
        let metrics = BuiltinMetrics::register(&registry)?;
        Ok(Self {
            started: Instant::now(),
            registry,
            metrics,
            cancel,
            tags,
        })
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn metrics(&self) -> &BuiltinMetrics {
        &self.metrics
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }
}
