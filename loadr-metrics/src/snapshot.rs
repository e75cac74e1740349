use hdrhistogram::Histogram;
use std::sync::Arc;

use crate::series::{MetricKind, TREND_SCALE};
use crate::tags::TagSet;

/// Point-in-time copy of every series in a [`crate::Registry`].
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    series: Vec<SeriesSnapshot>,
}

#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub name: Arc<str>,
    pub kind: MetricKind,
    pub tags: TagSet,
    pub values: SeriesValues,
}

#[derive(Debug, Clone)]
pub enum SeriesValues {
    Counter {
        count: u64,
        sum: f64,
    },
    Gauge {
        count: u64,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    Rate {
        total: u64,
        hits: u64,
    },
    Trend(TrendSummary),
}

#[derive(Debug, Clone)]
pub struct TrendSummary {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Values scaled by 1000 (see `TREND_SCALE`).
    pub histogram: Histogram<u64>,
}

fn merge_opt(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

impl TrendSummary {
    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// `p` is a percentage in `(0, 100]`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.histogram.is_empty() {
            return None;
        }
        let raw = self.histogram.value_at_quantile(p / 100.0) as f64 / TREND_SCALE;
        // Bucket rounding can overshoot the exact extremes.
        let raw = match (self.min, self.max) {
            (Some(lo), Some(hi)) if lo <= hi => raw.clamp(lo, hi),
            _ => raw,
        };
        Some(raw)
    }

    pub fn med(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    fn merge(&mut self, other: &TrendSummary) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = merge_opt(self.min, other.min, f64::min);
        self.max = merge_opt(self.max, other.max, f64::max);
        let _ = self.histogram.add(&other.histogram);
    }
}

impl SeriesValues {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Gauge { .. } => MetricKind::Gauge,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Number of samples that contributed to these values.
    pub fn samples(&self) -> u64 {
        match self {
            Self::Counter { count, .. } | Self::Gauge { count, .. } => *count,
            Self::Rate { total, .. } => *total,
            Self::Trend(t) => t.count,
        }
    }

    /// Hit ratio of a rate metric.
    pub fn rate(&self) -> Option<f64> {
        match self {
            Self::Rate { total, hits } if *total > 0 => Some(*hits as f64 / *total as f64),
            _ => None,
        }
    }

    /// Folds `other` into `self`. Returns `false` (leaving `self` untouched) when the kinds differ.
    pub fn merge(&mut self, other: &SeriesValues) -> bool {
        match (self, other) {
            (Self::Counter { count, sum }, Self::Counter { count: c, sum: s }) => {
                *count += c;
                *sum += s;
            }
            (
                Self::Gauge {
                    count,
                    value,
                    min,
                    max,
                },
                Self::Gauge {
                    count: c,
                    value: v,
                    min: lo,
                    max: hi,
                },
            ) => {
                *count += c;
                *value += v;
                *min = merge_opt(*min, *lo, f64::min);
                *max = merge_opt(*max, *hi, f64::max);
            }
            (Self::Rate { total, hits }, Self::Rate { total: t, hits: h }) => {
                *total += t;
                *hits += h;
            }
            (Self::Trend(a), Self::Trend(b)) => a.merge(b),
            _ => return false,
        }
        true
    }
}

impl Snapshot {
    pub(crate) fn new(mut series: Vec<SeriesSnapshot>) -> Self {
        series.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        Self { series }
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn series(&self) -> impl Iterator<Item = &SeriesSnapshot> + '_ {
        self.series.iter()
    }

    /// Distinct metric names with their kind, in name order.
    pub fn metrics(&self) -> Vec<(&str, MetricKind)> {
        let mut out: Vec<(&str, MetricKind)> = Vec::new();
        for s in &self.series {
            if out.last().map(|(n, _)| *n) != Some(s.name.as_ref()) {
                out.push((s.name.as_ref(), s.kind));
            }
        }
        out
    }

    /// Merges every series of `name` whose tags match all `filters`.
    pub fn metric(&self, name: &str, filters: &[(&str, &str)]) -> Option<SeriesValues> {
        let mut acc: Option<SeriesValues> = None;
        for s in self
            .series
            .iter()
            .filter(|s| s.name.as_ref() == name && s.tags.matches(filters))
        {
            match acc.as_mut() {
                Some(values) => {
                    values.merge(&s.values);
                }
                None => acc = Some(s.values.clone()),
            }
        }
        acc
    }

    /// Sum of a counter across all its series; `0` when absent.
    pub fn counter_total(&self, name: &str) -> f64 {
        match self.metric(name, &[]) {
            Some(SeriesValues::Counter { sum, .. }) => sum,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::new_trend_histogram;

    fn trend(values: &[f64]) -> TrendSummary {
        let mut histogram = new_trend_histogram().unwrap_or_else(|e| panic!("{e}"));
        for v in values {
            histogram.saturating_record((v * TREND_SCALE) as u64);
        }
        TrendSummary {
            count: values.len() as u64,
            sum: values.iter().sum(),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            histogram,
        }
    }

    fn series(name: &str, tags: &[(&str, &str)], values: SeriesValues) -> SeriesSnapshot {
        SeriesSnapshot {
            name: Arc::from(name),
            kind: values.kind(),
            tags: TagSet::from_pairs(tags.iter().copied()),
            values,
        }
    }

    #[test]
    fn percentile_of_mostly_fast_samples() {
        let mut values = vec![100.0; 96];
        values.extend([600.0; 4]);
        let t = trend(&values);

        let p95 = t.percentile(95.0).unwrap_or_else(|| panic!("no p95"));
        assert!((99.0..=101.0).contains(&p95), "p95 = {p95}");
        let p99 = t.percentile(99.0).unwrap_or_else(|| panic!("no p99"));
        assert!((599.0..=601.0).contains(&p99), "p99 = {p99}");
        assert_eq!(t.avg(), Some(120.0));
    }

    #[test]
    fn empty_trend_has_no_statistics() {
        let t = trend(&[]);
        assert_eq!(t.avg(), None);
        assert_eq!(t.med(), None);
        assert_eq!(t.percentile(95.0), None);
    }

    #[test]
    fn metric_merges_series_matching_filters() {
        let snap = Snapshot::new(vec![
            series(
                "http_req_failed",
                &[("status", "200")],
                SeriesValues::Rate { total: 100, hits: 0 },
            ),
            series(
                "http_req_failed",
                &[("status", "500")],
                SeriesValues::Rate { total: 4, hits: 4 },
            ),
            series(
                "iterations",
                &[],
                SeriesValues::Counter {
                    count: 3,
                    sum: 3.0,
                },
            ),
        ]);

        let all = snap
            .metric("http_req_failed", &[])
            .unwrap_or_else(|| panic!("missing metric"));
        assert_eq!(all.samples(), 104);
        assert_eq!(all.rate(), Some(4.0 / 104.0));

        let ok = snap
            .metric("http_req_failed", &[("status", "200")])
            .unwrap_or_else(|| panic!("missing metric"));
        assert_eq!(ok.rate(), Some(0.0));

        assert!(snap.metric("http_req_failed", &[("status", "404")]).is_none());
        assert!(snap.metric("nope", &[]).is_none());
        assert_eq!(snap.counter_total("iterations"), 3.0);
        assert_eq!(
            snap.metrics(),
            vec![
                ("http_req_failed", MetricKind::Rate),
                ("iterations", MetricKind::Counter)
            ]
        );
    }

    #[test]
    fn trend_merge_is_order_independent() {
        let a = trend(&[1.0, 2.0, 3.0]);
        let b = trend(&[10.0, 20.0]);

        let mut ab = SeriesValues::Trend(a.clone());
        ab.merge(&SeriesValues::Trend(b.clone()));
        let mut ba = SeriesValues::Trend(b);
        ba.merge(&SeriesValues::Trend(a));

        let (SeriesValues::Trend(ab), SeriesValues::Trend(ba)) = (ab, ba) else {
            panic!("expected trends");
        };
        assert_eq!(ab.count, ba.count);
        assert_eq!(ab.sum, ba.sum);
        assert_eq!(ab.min, Some(1.0));
        assert_eq!(ba.max, Some(20.0));
        assert_eq!(ab.med(), ba.med());
        assert_eq!(ab.percentile(90.0), ba.percentile(90.0));
    }

    #[test]
    fn merge_rejects_mismatched_kinds() {
        let mut counter = SeriesValues::Counter {
            count: 1,
            sum: 1.0,
        };
        assert!(!counter.merge(&SeriesValues::Rate { total: 1, hits: 1 }));
        assert_eq!(counter.samples(), 1);
    }
}
