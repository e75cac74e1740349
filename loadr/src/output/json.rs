use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use loadr_core::{AbortReason, RunReport};
use loadr_metrics::SeriesValues;

use super::OutputFormatter;
use super::digest::{PERCENTILES, check_rows, metric_rows, percentile_label};
use crate::test_file::TestPlan;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _test_path: &Path, _plan: &TestPlan) {}

    /// Stdout carries a single summary document, so there is no progress stream.
    fn progress(&self) -> Option<loadr_core::ProgressFn> {
        None
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        let doc = build_summary(report);
        let mut out = std::io::stdout().lock();
        serde_json::to_writer(&mut out, &doc)?;
        writeln!(out)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummary {
    pub kind: &'static str,
    pub passed: bool,
    pub elapsed_secs: f64,
    pub vus_max: u64,
    pub interrupted_vus: usize,
    pub aborted: Option<JsonAbort>,
    pub checks: Vec<JsonCheck>,
    pub metrics: BTreeMap<String, JsonMetric>,
    pub thresholds: Vec<JsonThreshold>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub(crate) enum JsonAbort {
    Threshold { selector: String, expression: String },
    Cancelled,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonCheck {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum JsonMetric {
    Counter {
        count: u64,
        sum: f64,
        rate: f64,
    },
    Gauge {
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    Rate {
        total: u64,
        hits: u64,
        rate: Option<f64>,
    },
    Trend {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        max: Option<f64>,
        percentiles: BTreeMap<String, Option<f64>>,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub selector: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
    pub abort_on_fail: bool,
}

fn metric(values: &SeriesValues, elapsed_secs: f64) -> JsonMetric {
    match values {
        SeriesValues::Counter { count, sum } => JsonMetric::Counter {
            count: *count,
            sum: *sum,
            rate: sum / elapsed_secs.max(1e-9),
        },
        SeriesValues::Gauge {
            value, min, max, ..
        } => JsonMetric::Gauge {
            value: *value,
            min: *min,
            max: *max,
        },
        SeriesValues::Rate { total, hits } => JsonMetric::Rate {
            total: *total,
            hits: *hits,
            rate: values.rate(),
        },
        SeriesValues::Trend(t) => JsonMetric::Trend {
            count: t.count,
            avg: t.avg(),
            min: t.min,
            med: t.med(),
            max: t.max,
            percentiles: PERCENTILES
                .iter()
                .map(|p| (percentile_label(*p), t.percentile(*p)))
                .collect(),
        },
    }
}

pub(crate) fn build_summary(report: &RunReport) -> JsonSummary {
    let elapsed_secs = report.elapsed.as_secs_f64();

    JsonSummary {
        kind: "summary",
        passed: report.passed(),
        elapsed_secs,
        vus_max: report.vus_max,
        interrupted_vus: report.interrupted_vus,
        aborted: report.aborted.as_ref().map(|a| match a {
            AbortReason::Threshold {
                selector,
                expression,
            } => JsonAbort::Threshold {
                selector: selector.clone(),
                expression: expression.clone(),
            },
            AbortReason::Cancelled => JsonAbort::Cancelled,
        }),
        checks: check_rows(&report.snapshot)
            .into_iter()
            .map(|c| JsonCheck {
                name: c.name,
                passes: c.passes,
                fails: c.fails,
            })
            .collect(),
        metrics: metric_rows(&report.snapshot)
            .into_iter()
            .map(|row| {
                let m = metric(&row.values, elapsed_secs);
                (row.name, m)
            })
            .collect(),
        thresholds: report
            .thresholds
            .results
            .iter()
            .map(|r| JsonThreshold {
                selector: r.selector.clone(),
                expression: r.expression.clone(),
                observed: r.observed,
                passed: r.passed,
                abort_on_fail: r.abort_on_fail,
            })
            .collect(),
    }
}
