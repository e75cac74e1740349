use std::time::Duration;

use loadr_metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a run profile needs at least one stage")]
    EmptyProfile,

    #[error("stage {index}: duration must be greater than zero")]
    ZeroStageDuration { index: usize },

    #[error("`{name}` must be greater than zero (got {value:?})")]
    InvalidInterval { name: &'static str, value: Duration },

    #[error("invalid threshold `{expression}` on `{selector}`: {reason}")]
    InvalidThreshold {
        selector: String,
        expression: String,
        reason: String,
    },

    #[error("threshold references unknown metric `{0}`")]
    UnknownThresholdMetric(String),

    #[error("aggregation `{agg}` is not supported for {kind} metric `{metric}`")]
    UnsupportedAggregation {
        metric: String,
        kind: MetricKind,
        agg: String,
    },

    #[error(transparent)]
    Metrics(#[from] loadr_metrics::Error),
}

impl Error {
    /// True for errors caused by the run's configuration rather than by the run itself.
    pub fn is_invalid_input(&self) -> bool {
        match self {
            Self::EmptyProfile
            | Self::ZeroStageDuration { .. }
            | Self::InvalidInterval { .. }
            | Self::InvalidThreshold { .. }
            | Self::UnknownThresholdMetric(_)
            | Self::UnsupportedAggregation { .. } => true,
            Self::Metrics(e) => matches!(
                e,
                loadr_metrics::Error::InvalidName(_) | loadr_metrics::Error::KindMismatch { .. }
            ),
        }
    }
}
