#![forbid(unsafe_code)]

mod atomic;
mod error;
mod registry;
mod sample;
mod series;
mod snapshot;
mod tags;

pub use error::{Error, Result};
pub use registry::{MetricId, Registry, SeriesHandle};
pub use sample::Sample;
pub use series::MetricKind;
pub use snapshot::{SeriesSnapshot, SeriesValues, Snapshot, TrendSummary};
pub use tags::TagSet;
