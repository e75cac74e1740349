use std::fmt::Write as _;

use loadr_core::{AbortReason, RunReport};
use loadr_metrics::SeriesValues;

use super::format::*;
use crate::output::digest::{PERCENTILES, check_rows, metric_rows, percentile_label};

/// Metrics whose trend values are milliseconds.
fn is_duration_metric(name: &str) -> bool {
    name.ends_with("_duration")
}

pub(crate) fn render(report: &RunReport) -> String {
    let mut out = String::new();
    let secs = report.elapsed.as_secs_f64().max(1e-9);

    out.push_str("summary\n");
    writeln!(out, "  elapsed: {}", format_duration(report.elapsed)).ok();
    writeln!(out, "  vus_max: {}", report.vus_max).ok();
    match &report.aborted {
        Some(AbortReason::Threshold {
            selector,
            expression,
        }) => {
            writeln!(out, "  aborted: threshold {selector} {expression} failed").ok();
        }
        Some(AbortReason::Cancelled) => {
            out.push_str("  aborted: cancelled\n");
        }
        None => {}
    }
    if report.interrupted_vus > 0 {
        writeln!(
            out,
            "  interrupted_vus: {} (graceful stop timed out)",
            report.interrupted_vus
        )
        .ok();
    }

    let checks = check_rows(&report.snapshot);
    if !checks.is_empty() {
        out.push_str("\nchecks\n");
        for c in &checks {
            let total = c.passes + c.fails;
            let status = if c.fails > 0 { "FAIL" } else { "OK" };
            let ratio = if total > 0 {
                c.passes as f64 / total as f64
            } else {
                0.0
            };
            writeln!(
                out,
                "  {}: pass={} fail={} ({}) [{status}]",
                c.name,
                c.passes,
                c.fails,
                format_percent(ratio)
            )
            .ok();
        }
    }

    let rows = metric_rows(&report.snapshot);
    if !rows.is_empty() {
        out.push_str("\nmetrics\n");
    }
    for row in rows {
        let name = &row.name;
        match &row.values {
            SeriesValues::Counter { sum, .. } => {
                writeln!(
                    out,
                    "  {name} = {} ({}/s)",
                    format_number(*sum),
                    format_rate(sum / secs)
                )
                .ok();
            }
            SeriesValues::Gauge {
                count, min, max, ..
            } => {
                let show = |v: Option<f64>| v.map_or_else(|| "-".to_string(), format_number);
                writeln!(
                    out,
                    "  {name} = min={} max={} (n={count})",
                    show(*min),
                    show(*max)
                )
                .ok();
            }
            SeriesValues::Rate { total, hits } => {
                let rate = row.values.rate().unwrap_or(0.0);
                writeln!(
                    out,
                    "  {name} = {} ({hits} of {total})",
                    format_percent(rate)
                )
                .ok();
            }
            SeriesValues::Trend(t) => {
                let show = |v: Option<f64>| {
                    if is_duration_metric(name) {
                        format_millis_opt(v)
                    } else {
                        v.map_or_else(|| "-".to_string(), format_number)
                    }
                };
                let mut line = format!(
                    "  {name} = avg={} min={} med={} max={}",
                    show(t.avg()),
                    show(t.min),
                    show(t.med()),
                    show(t.max)
                );
                for p in PERCENTILES {
                    write!(line, " {}={}", percentile_label(p), show(t.percentile(p))).ok();
                }
                writeln!(out, "{line} (n={})", t.count).ok();
            }
        }
    }

    if !report.thresholds.results.is_empty() {
        out.push_str("\nthresholds\n");
        for r in &report.thresholds.results {
            let mark = if r.passed { "ok  " } else { "FAIL" };
            let observed = r
                .observed
                .map_or_else(|| "no data".to_string(), format_number);
            writeln!(
                out,
                "  [{mark}] {} {} (observed {observed})",
                r.selector, r.expression
            )
            .ok();
        }
    }

    out
}
