use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use loadr_metrics::{MetricKind, Registry, SeriesValues, Snapshot};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
}

impl ThresholdOp {
    fn compare(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Lte => left <= right,
            Self::Gt => left > right,
            Self::Gte => left >= right,
            Self::Eq => left == right,
            Self::Ne => left != right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Sum,
    Rate,
    Value,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Sum => f.write_str("sum"),
            Self::Rate => f.write_str("rate"),
            Self::Value => f.write_str("value"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

impl ThresholdAgg {
    fn supports(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Self::Count | Self::Rate),
            MetricKind::Gauge => matches!(self, Self::Value | Self::Min | Self::Max),
            MetricKind::Rate => matches!(self, Self::Rate | Self::Count),
            MetricKind::Trend => matches!(
                self,
                Self::Avg | Self::Min | Self::Max | Self::Med | Self::Count | Self::Sum | Self::P(_)
            ),
        }
    }

    /// `None` when the metric has no data (or the combination makes no sense).
    fn observe(self, values: &SeriesValues, elapsed: Duration) -> Option<f64> {
        match (values, self) {
            (SeriesValues::Counter { sum, .. }, Self::Count) => Some(*sum),
            (SeriesValues::Counter { sum, .. }, Self::Rate) => {
                let secs = elapsed.as_secs_f64();
                (secs > 0.0).then(|| sum / secs)
            }

            (SeriesValues::Gauge { count, value, .. }, Self::Value) => {
                (*count > 0).then_some(*value)
            }
            (SeriesValues::Gauge { min, .. }, Self::Min) => *min,
            (SeriesValues::Gauge { max, .. }, Self::Max) => *max,

            (SeriesValues::Rate { .. }, Self::Rate) => values.rate(),
            (SeriesValues::Rate { total, .. }, Self::Count) => Some(*total as f64),

            (SeriesValues::Trend(t), Self::Avg) => t.avg(),
            (SeriesValues::Trend(t), Self::Min) => t.min,
            (SeriesValues::Trend(t), Self::Max) => t.max,
            (SeriesValues::Trend(t), Self::Med) => t.med(),
            (SeriesValues::Trend(t), Self::Count) => Some(t.count as f64),
            (SeriesValues::Trend(t), Self::Sum) => (t.count > 0).then_some(t.sum),
            (SeriesValues::Trend(t), Self::P(p)) => t.percentile(p),

            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

impl FromStr for ThresholdExpr {
    type Err = String;

    /// `agg op number`, whitespace-insensitive, e.g. `p(95) < 500` or `rate<0.01`.
    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if s.is_empty() {
            return Err("empty threshold".to_string());
        }

        let op_pos = s
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| "missing comparison operator".to_string())?;
        let (left, rest) = s.split_at(op_pos);
        let op_len = if rest[1..].starts_with('=') { 2 } else { 1 };
        let (op_raw, right) = rest.split_at(op_len);

        let op = ThresholdOp::from_str(op_raw)
            .map_err(|_| format!("unknown comparison operator `{op_raw}`"))?;
        if left.is_empty() {
            return Err("missing aggregation".to_string());
        }
        if right.is_empty() {
            return Err("missing threshold value".to_string());
        }

        let agg = match left.to_ascii_lowercase().as_str() {
            "avg" => ThresholdAgg::Avg,
            "min" => ThresholdAgg::Min,
            "max" => ThresholdAgg::Max,
            "med" => ThresholdAgg::Med,
            "count" => ThresholdAgg::Count,
            "sum" => ThresholdAgg::Sum,
            "rate" => ThresholdAgg::Rate,
            "value" => ThresholdAgg::Value,
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|v| v.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown aggregation `{left}`"))?;
                let p: f64 = inner
                    .parse()
                    .map_err(|_| format!("invalid percentile `{inner}`"))?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(format!("percentile {inner} out of range (0, 100]"));
                }
                ThresholdAgg::P(p)
            }
        };

        let value: f64 = right
            .parse()
            .map_err(|_| format!("invalid threshold value `{right}`"))?;
        if !value.is_finite() {
            return Err(format!("threshold value `{right}` is not finite"));
        }

        Ok(Self { agg, op, value })
    }
}

/// Metric name plus optional `{tag:value,...}` filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub metric: String,
    pub filters: Vec<(String, String)>,
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let raw = raw.trim();
        let Some(open) = raw.find('{') else {
            if raw.is_empty() {
                return Err("empty metric name".to_string());
            }
            return Ok(Self {
                metric: raw.to_string(),
                filters: Vec::new(),
            });
        };

        let metric = raw[..open].trim();
        let body = raw[open + 1..]
            .strip_suffix('}')
            .ok_or_else(|| "unterminated tag filter".to_string())?;
        if metric.is_empty() {
            return Err("empty metric name".to_string());
        }

        let mut filters = Vec::new();
        for part in body.split(',') {
            let (k, v) = part
                .split_once(':')
                .ok_or_else(|| format!("tag filter `{}` must be `key:value`", part.trim()))?;
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() {
                return Err("empty tag key in filter".to_string());
            }
            filters.push((k.to_string(), v.to_string()));
        }

        Ok(Self {
            metric: metric.to_string(),
            filters,
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.metric)?;
        if self.filters.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("}")
    }
}

/// A threshold as configured, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdRule {
    pub selector: String,
    pub expression: String,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

impl ThresholdRule {
    pub fn new(selector: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            expression: expression.into(),
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        }
    }

    /// Cancel the run as soon as this rule fails, but not before `delay` has elapsed.
    #[must_use]
    pub fn abort_on_fail(mut self, delay: Duration) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: ThresholdRule,
    selector: Selector,
    expr: ThresholdExpr,
}

/// Parsed thresholds, ready to be evaluated against snapshots.
#[derive(Debug, Clone, Default)]
pub struct ThresholdSet {
    rules: Vec<CompiledRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    /// Selector as configured, e.g. `http_req_duration{status:200}`.
    pub selector: String,
    pub expression: String,
    /// `None` when the metric had no data.
    pub observed: Option<f64>,
    pub passed: bool,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdReport {
    pub results: Vec<ThresholdResult>,
}

impl ThresholdReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ThresholdResult> + '_ {
        self.results.iter().filter(|r| !r.passed)
    }

    /// First failing rule that asks for the run to be aborted at `elapsed`.
    pub fn abort_trigger(&self, elapsed: Duration) -> Option<&ThresholdResult> {
        self.failures()
            .find(|r| r.abort_on_fail && elapsed >= r.delay_abort_eval)
    }
}

impl ThresholdSet {
    /// Parses every rule. Nothing is evaluated yet.
    pub fn compile(rules: impl IntoIterator<Item = ThresholdRule>) -> Result<Self> {
        let mut compiled = Vec::new();
        for rule in rules {
            let invalid = |reason: String| Error::InvalidThreshold {
                selector: rule.selector.clone(),
                expression: rule.expression.clone(),
                reason,
            };
            let selector: Selector = rule.selector.parse().map_err(invalid)?;
            let expr: ThresholdExpr = rule.expression.parse().map_err(invalid)?;
            compiled.push(CompiledRule {
                rule,
                selector,
                expr,
            });
        }
        Ok(Self { rules: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn has_abort_rules(&self) -> bool {
        self.rules.iter().any(|r| r.rule.abort_on_fail)
    }

    /// Checks that every referenced metric exists and supports its aggregation.
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        for r in &self.rules {
            let (_, kind) = registry
                .lookup(&r.selector.metric)
                .ok_or_else(|| Error::UnknownThresholdMetric(r.selector.metric.clone()))?;
            if !r.expr.agg.supports(kind) {
                return Err(Error::UnsupportedAggregation {
                    metric: r.selector.metric.clone(),
                    kind,
                    agg: r.expr.agg.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Pure: the same snapshot and `elapsed` always give the same report.
    pub fn evaluate(&self, snapshot: &Snapshot, elapsed: Duration) -> ThresholdReport {
        let results = self
            .rules
            .iter()
            .map(|r| {
                let filters: Vec<(&str, &str)> = r
                    .selector
                    .filters
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let observed = snapshot
                    .metric(&r.selector.metric, &filters)
                    .and_then(|values| r.expr.agg.observe(&values, elapsed));
                let passed = observed.is_some_and(|v| r.expr.op.compare(v, r.expr.value));
                ThresholdResult {
                    selector: r.rule.selector.clone(),
                    expression: r.rule.expression.clone(),
                    observed,
                    passed,
                    abort_on_fail: r.rule.abort_on_fail,
                    delay_abort_eval: r.rule.delay_abort_eval,
                }
            })
            .collect();
        ThresholdReport { results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadr_metrics::{Sample, TagSet};

    fn expr(raw: &str) -> ThresholdExpr {
        raw.parse().unwrap_or_else(|e| panic!("{raw}: {e}"))
    }

    fn set(rules: Vec<ThresholdRule>) -> ThresholdSet {
        ThresholdSet::compile(rules).unwrap_or_else(|e| panic!("{e}"))
    }

    fn ingest(reg: &Registry, name: &str, value: f64, tags: &[(&str, &str)]) {
        reg.ingest(&Sample::new(name, value).with_tags(TagSet::from_pairs(tags.iter().copied())))
            .unwrap_or_else(|e| panic!("{e}"));
    }

    fn snapshot(reg: &Registry) -> Snapshot {
        reg.snapshot().unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn parses_every_operator_and_aggregation() {
        assert_eq!(
            expr("  p(95)  <  500 "),
            ThresholdExpr {
                agg: ThresholdAgg::P(95.0),
                op: ThresholdOp::Lt,
                value: 500.0
            }
        );
        assert_eq!(expr("p(99.9)<=1.5").agg, ThresholdAgg::P(99.9));
        assert_eq!(expr("rate<0.01").op, ThresholdOp::Lt);
        assert_eq!(expr("avg>=2").op, ThresholdOp::Gte);
        assert_eq!(expr("max>2").op, ThresholdOp::Gt);
        assert_eq!(expr("count==0").op, ThresholdOp::Eq);
        assert_eq!(expr("value!=3").op, ThresholdOp::Ne);
        assert_eq!(expr("MED<=-1").value, -1.0);
        assert_eq!(expr("sum<1e3").value, 1000.0);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in [
            "", "p95<1", "p(0)<1", "p(101)<1", "avg 500", "avg<", "<5", "avg=<5", "avg<abc",
            "stdev<1", "avg<inf", "avg!5",
        ] {
            assert!(bad.parse::<ThresholdExpr>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn parses_selectors_with_tag_filters() {
        let s: Selector = "http_req_duration{ status:200 , method:GET }"
            .parse()
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(s.metric, "http_req_duration");
        assert_eq!(
            s.filters,
            vec![
                ("status".to_string(), "200".to_string()),
                ("method".to_string(), "GET".to_string())
            ]
        );
        assert_eq!(s.to_string(), "http_req_duration{status:200,method:GET}");

        assert!("checks{check".parse::<Selector>().is_err());
        assert!("{a:b}".parse::<Selector>().is_err());
        assert!("checks{nocolon}".parse::<Selector>().is_err());
    }

    #[test]
    fn compile_reports_the_offending_rule() {
        let err = ThresholdSet::compile([ThresholdRule::new("http_req_failed", "rate<<1")]);
        let Err(Error::InvalidThreshold { selector, .. }) = err else {
            panic!("expected invalid threshold");
        };
        assert_eq!(selector, "http_req_failed");
    }

    #[test]
    fn validate_rejects_unknown_metrics_and_unsupported_aggregations() {
        let reg = Registry::new();
        reg.register("http_reqs", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        reg.register("http_req_duration", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));

        let unknown = set(vec![ThresholdRule::new("nope", "count>0")]);
        assert!(matches!(
            unknown.validate(&reg),
            Err(Error::UnknownThresholdMetric(_))
        ));

        let unsupported = set(vec![ThresholdRule::new("http_reqs", "p(95)<1")]);
        assert!(matches!(
            unsupported.validate(&reg),
            Err(Error::UnsupportedAggregation {
                kind: MetricKind::Counter,
                ..
            })
        ));

        let ok = set(vec![
            ThresholdRule::new("http_reqs", "rate>10"),
            ThresholdRule::new("http_req_duration{status:200}", "p(95)<500"),
        ]);
        assert!(ok.validate(&reg).is_ok());
    }

    #[test]
    fn p95_of_mostly_fast_requests_passes() {
        let reg = Registry::new();
        reg.register("http_req_duration", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));
        for _ in 0..96 {
            ingest(&reg, "http_req_duration", 100.0, &[]);
        }
        for _ in 0..4 {
            ingest(&reg, "http_req_duration", 600.0, &[]);
        }

        let thresholds = set(vec![ThresholdRule::new("http_req_duration", "p(95)<500")]);
        let report = thresholds.evaluate(&snapshot(&reg), Duration::from_secs(10));
        assert!(report.passed());
        let observed = report.results[0]
            .observed
            .unwrap_or_else(|| panic!("no observation"));
        assert!((99.0..=101.0).contains(&observed), "p95 = {observed}");

        let strict = set(vec![ThresholdRule::new("http_req_duration", "p(99)<500")]);
        assert!(!strict.evaluate(&snapshot(&reg), Duration::from_secs(10)).passed());
    }

    #[test]
    fn failure_rate_above_limit_fails() {
        let reg = Registry::new();
        reg.register("http_req_failed", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        for i in 0..150 {
            let failed = if i < 2 { 1.0 } else { 0.0 };
            ingest(&reg, "http_req_failed", failed, &[]);
        }

        let thresholds = set(vec![ThresholdRule::new("http_req_failed", "rate<0.01")]);
        let report = thresholds.evaluate(&snapshot(&reg), Duration::from_secs(10));
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.results[0].observed, Some(2.0 / 150.0));
    }

    #[test]
    fn missing_data_fails_and_evaluation_is_deterministic() {
        let reg = Registry::new();
        reg.register("checks", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        reg.register("iterations", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        ingest(&reg, "checks", 1.0, &[("check", "a")]);
        ingest(&reg, "iterations", 1.0, &[]);
        ingest(&reg, "iterations", 1.0, &[]);

        let thresholds = set(vec![
            ThresholdRule::new("checks{check:a}", "rate==1"),
            ThresholdRule::new("checks{check:b}", "rate>0"),
            ThresholdRule::new("iterations", "count==2"),
            ThresholdRule::new("iterations", "rate>=0.5"),
        ]);
        let snap = snapshot(&reg);
        let first = thresholds.evaluate(&snap, Duration::from_secs(4));
        let second = thresholds.evaluate(&snap, Duration::from_secs(4));
        assert_eq!(first, second);

        let passed: Vec<bool> = first.results.iter().map(|r| r.passed).collect();
        assert_eq!(passed, vec![true, false, true, true]);
        assert_eq!(first.results[1].observed, None);
        assert_eq!(first.results[3].observed, Some(0.5));
    }

    #[test]
    fn gauge_aggregations_use_value_and_extremes() {
        let reg = Registry::new();
        reg.register("vus", MetricKind::Gauge)
            .unwrap_or_else(|e| panic!("{e}"));
        for v in [3.0, 10.0, 4.0] {
            ingest(&reg, "vus", v, &[]);
        }
        let thresholds = set(vec![
            ThresholdRule::new("vus", "value==4"),
            ThresholdRule::new("vus", "max<=10"),
            ThresholdRule::new("vus", "min>3"),
        ]);
        let report = thresholds.evaluate(&snapshot(&reg), Duration::from_secs(1));
        let passed: Vec<bool> = report.results.iter().map(|r| r.passed).collect();
        assert_eq!(passed, vec![true, true, false]);
    }

    #[test]
    fn abort_trigger_respects_delay() {
        let reg = Registry::new();
        reg.register("iteration_failed", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        ingest(&reg, "iteration_failed", 1.0, &[]);

        let thresholds = set(vec![
            ThresholdRule::new("iteration_failed", "rate<0.5"),
            ThresholdRule::new("iteration_failed", "rate<0.1")
                .abort_on_fail(Duration::from_secs(10)),
        ]);
        assert!(thresholds.has_abort_rules());

        let snap = snapshot(&reg);
        let early = thresholds.evaluate(&snap, Duration::from_secs(5));
        assert!(early.abort_trigger(Duration::from_secs(5)).is_none());

        let late = thresholds.evaluate(&snap, Duration::from_secs(12));
        let trigger = late
            .abort_trigger(Duration::from_secs(12))
            .unwrap_or_else(|| panic!("expected abort"));
        assert_eq!(trigger.expression, "rate<0.1");
    }
}
