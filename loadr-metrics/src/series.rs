use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::atomic::AtomicF64;
use crate::error::Result;
use crate::snapshot::{SeriesValues, TrendSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    /// Cumulative sum of added values.
    Counter,
    /// Last observed value (plus min/max).
    Gauge,
    /// Share of non-zero samples.
    Rate,
    /// Distribution of values (min/max/avg/percentiles).
    Trend,
}

/// Trend values are stored as integers with this many units per 1.0.
pub(crate) const TREND_SCALE: f64 = 1000.0;

const HISTOGRAM_SHARDS: usize = 8;

pub(crate) fn new_trend_histogram() -> Result<Histogram<u64>> {
    // One hour of milliseconds at TREND_SCALE resolution; grows past that on demand.
    let mut h = Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3)?;
    h.auto(true);
    Ok(h)
}

fn shard_index() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    thread_local! {
        static SHARD: usize = NEXT.fetch_add(1, Ordering::Relaxed) % HISTOGRAM_SHARDS;
    }
    SHARD.with(|s| *s)
}

#[derive(Debug)]
struct ShardedHistogram {
    shards: Box<[Mutex<Histogram<u64>>]>,
}

impl ShardedHistogram {
    fn new() -> Result<Self> {
        let shards = (0..HISTOGRAM_SHARDS)
            .map(|_| new_trend_histogram().map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            shards: shards.into_boxed_slice(),
        })
    }

    fn record(&self, scaled: u64) {
        let mut h = self.shards[shard_index()].lock();
        h.saturating_record(scaled);
    }

    fn merged(&self) -> Result<Histogram<u64>> {
        let mut acc = new_trend_histogram()?;
        for shard in self.shards.iter() {
            let h = shard.lock();
            let _ = acc.add(&*h);
        }
        Ok(acc)
    }
}

#[derive(Debug)]
pub(crate) struct CounterAgg {
    count: AtomicU64,
    sum: AtomicF64,
}

impl CounterAgg {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicF64::new(0.0),
        }
    }

    fn record(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value);
    }

    fn snapshot(&self) -> SeriesValues {
        SeriesValues::Counter {
            count: self.count.load(Ordering::Relaxed),
            sum: self.sum.load(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct GaugeAgg {
    count: AtomicU64,
    last: AtomicF64,
    min: AtomicF64,
    max: AtomicF64,
}

impl GaugeAgg {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            last: AtomicF64::new(0.0),
            min: AtomicF64::new(f64::INFINITY),
            max: AtomicF64::new(f64::NEG_INFINITY),
        }
    }

    fn record(&self, value: f64) {
        self.last.store(value);
        self.min.fetch_min(value);
        self.max.fetch_max(value);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SeriesValues {
        let count = self.count.load(Ordering::Relaxed);
        SeriesValues::Gauge {
            count,
            value: self.last.load(),
            min: (count > 0).then(|| self.min.load()),
            max: (count > 0).then(|| self.max.load()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct RateAgg {
    total: AtomicU64,
    hits: AtomicU64,
}

impl RateAgg {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    fn record(&self, value: f64) {
        if value != 0.0 {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SeriesValues {
        SeriesValues::Rate {
            total: self.total.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub(crate) struct TrendAgg {
    count: AtomicU64,
    sum: AtomicF64,
    min: AtomicF64,
    max: AtomicF64,
    hist: ShardedHistogram,
}

impl TrendAgg {
    fn new() -> Result<Self> {
        Ok(Self {
            count: AtomicU64::new(0),
            sum: AtomicF64::new(0.0),
            min: AtomicF64::new(f64::INFINITY),
            max: AtomicF64::new(f64::NEG_INFINITY),
            hist: ShardedHistogram::new()?,
        })
    }

    fn record(&self, value: f64) {
        // Negative values are rejected before they get here.
        let scaled = (value * TREND_SCALE).round() as u64;
        self.hist.record(scaled);
        self.sum.fetch_add(value);
        self.min.fetch_min(value);
        self.max.fetch_max(value);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Result<SeriesValues> {
        let histogram = self.hist.merged()?;
        let count = self.count.load(Ordering::Relaxed);
        Ok(SeriesValues::Trend(TrendSummary {
            count,
            sum: self.sum.load(),
            min: (count > 0).then(|| self.min.load()),
            max: (count > 0).then(|| self.max.load()),
            histogram,
        }))
    }
}

/// Live aggregation state of one `(metric, tags)` series.
#[derive(Debug)]
pub(crate) enum SeriesStorage {
    Counter(CounterAgg),
    Gauge(GaugeAgg),
    Rate(RateAgg),
    Trend(TrendAgg),
}

impl SeriesStorage {
    pub(crate) fn new(kind: MetricKind) -> Result<Self> {
        Ok(match kind {
            MetricKind::Counter => Self::Counter(CounterAgg::new()),
            MetricKind::Gauge => Self::Gauge(GaugeAgg::new()),
            MetricKind::Rate => Self::Rate(RateAgg::new()),
            MetricKind::Trend => Self::Trend(TrendAgg::new()?),
        })
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Caller guarantees `value` is finite.
    pub(crate) fn record(&self, value: f64) {
        match self {
            Self::Counter(c) => c.record(value),
            Self::Gauge(g) => g.record(value),
            Self::Rate(r) => r.record(value),
            Self::Trend(t) => t.record(value),
        }
    }

    pub(crate) fn snapshot(&self) -> Result<SeriesValues> {
        Ok(match self {
            Self::Counter(c) => c.snapshot(),
            Self::Gauge(g) => g.snapshot(),
            Self::Rate(r) => r.snapshot(),
            Self::Trend(t) => t.snapshot()?,
        })
    }
}
