use loadr_metrics::{MetricId, MetricKind, Registry, Result, SeriesHandle, TagSet};

pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATION_FAILED: &str = "iteration_failed";
pub const CHECKS: &str = "checks";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

/// Ids of the metrics the engine itself emits.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinMetrics {
    pub iterations: MetricId,
    pub iteration_duration: MetricId,
    pub iteration_failed: MetricId,
    pub checks: MetricId,
    pub vus: MetricId,
    pub vus_max: MetricId,
}

impl BuiltinMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        Ok(Self {
            iterations: registry.register(ITERATIONS, MetricKind::Counter)?,
            iteration_duration: registry.register(ITERATION_DURATION, MetricKind::Trend)?,
            iteration_failed: registry.register(ITERATION_FAILED, MetricKind::Rate)?,
            checks: registry.register(CHECKS, MetricKind::Rate)?,
            vus: registry.register(VUS, MetricKind::Gauge)?,
            vus_max: registry.register(VUS_MAX, MetricKind::Gauge)?,
        })
    }
}

/// Series of the per-iteration built-ins, resolved once for the run's global tags.
#[derive(Debug, Clone)]
pub(crate) struct IterationSeries {
    pub(crate) iterations: SeriesHandle,
    pub(crate) duration: SeriesHandle,
    pub(crate) failed: SeriesHandle,
}

impl IterationSeries {
    pub(crate) fn resolve(registry: &Registry, ids: &BuiltinMetrics, tags: &TagSet) -> Result<Self> {
        Ok(Self {
            iterations: registry.handle(ids.iterations, tags.clone())?,
            duration: registry.handle(ids.iteration_duration, tags.clone())?,
            failed: registry.handle(ids.iteration_failed, tags.clone())?,
        })
    }
}
