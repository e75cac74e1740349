use std::sync::Arc;
use std::time::Duration;

use loadr_metrics::{SeriesValues, Snapshot};

use crate::metrics::{ITERATION_FAILED, ITERATIONS};
use crate::schedule::StageSnapshot;

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub stage: Option<StageSnapshot>,
    pub active_vus: u64,
    pub vus_max: u64,
    pub iterations_total: u64,
    pub iterations_failed: u64,
    /// Iterations/sec over the last progress interval.
    pub iterations_per_sec_now: f64,
    pub snapshot: Arc<Snapshot>,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

/// Iteration totals as `(completed, failed)`.
pub(crate) fn iteration_totals(snapshot: &Snapshot) -> (u64, u64) {
    let total = snapshot.counter_total(ITERATIONS).max(0.0) as u64;
    let failed = match snapshot.metric(ITERATION_FAILED, &[]) {
        Some(SeriesValues::Rate { hits, .. }) => hits,
        _ => 0,
    };
    (total, failed)
}

pub(crate) fn per_sec(delta: u64, dt: Duration) -> f64 {
    let secs = dt.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    delta as f64 / secs
}
