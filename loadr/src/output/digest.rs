use std::collections::BTreeMap;

use loadr_core::metrics::CHECKS;
use loadr_metrics::{SeriesValues, Snapshot};

/// Percentiles reported for every trend.
pub(crate) const PERCENTILES: [f64; 3] = [90.0, 95.0, 99.0];

/// One metric with all of its series merged.
#[derive(Debug, Clone)]
pub(crate) struct MetricRow {
    pub name: String,
    pub values: SeriesValues,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CheckRow {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

pub(crate) fn metric_rows(snapshot: &Snapshot) -> Vec<MetricRow> {
    snapshot
        .metrics()
        .into_iter()
        .filter_map(|(name, _)| {
            snapshot.metric(name, &[]).map(|values| MetricRow {
                name: name.to_string(),
                values,
            })
        })
        .collect()
}

/// Pass/fail counts per check name, in name order.
pub(crate) fn check_rows(snapshot: &Snapshot) -> Vec<CheckRow> {
    let mut by_name: BTreeMap<&str, CheckRow> = BTreeMap::new();
    for s in snapshot.series().filter(|s| s.name.as_ref() == CHECKS) {
        let (Some(name), SeriesValues::Rate { total, hits }) = (s.tags.get("check"), &s.values)
        else {
            continue;
        };
        let row = by_name.entry(name).or_insert_with(|| CheckRow {
            name: name.to_string(),
            ..CheckRow::default()
        });
        row.passes += hits;
        row.fails += total - hits;
    }
    by_name.into_values().collect()
}

pub(crate) fn percentile_label(p: f64) -> String {
    format!("p({p})")
}
