use crate::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid metric name `{0}` (expected [A-Za-z_][A-Za-z0-9_]*)")]
    InvalidName(String),

    #[error("metric `{name}` is already registered as {existing}, not {requested}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("metric `{name}` received a non-finite value ({value})")]
    NonFinite { name: String, value: f64 },

    #[error("trend `{name}` received a negative value ({value})")]
    NegativeTrend { name: String, value: f64 },

    #[error("failed to create histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),
}
