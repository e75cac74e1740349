mod config;
mod context;
mod error;
mod executor;
pub mod metrics;
mod pool;
mod progress;
mod run;
mod schedule;
mod thresholds;
mod workload;

pub use config::{RunOptions, RunProfile, Stage};
pub use context::RunContext;
pub use error::{Error, Result};
pub use metrics::BuiltinMetrics;
pub use pool::{ShutdownStats, VuPool};
pub use progress::{ProgressFn, ProgressUpdate};
pub use run::{AbortReason, RunReport, Runner};
pub use schedule::{RampingSchedule, StageSnapshot};
pub use thresholds::{
    Selector, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdReport, ThresholdResult,
    ThresholdRule, ThresholdSet,
};
pub use workload::{Check, IterationContext, IterationError, IterationOutcome, Workload};
