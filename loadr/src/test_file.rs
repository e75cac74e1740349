use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use loadr_core::{RunOptions, RunProfile, Stage, ThresholdRule, ThresholdSet};
use loadr_http::{HttpClient, HttpRequest, Method};
use loadr_metrics::TagSet;
use serde::Deserialize;

use crate::env::{self, EnvVars};
use crate::run_error::RunError;
use crate::workload::{CheckRule, CheckDef, HttpWorkload};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct TestFileYaml {
    pub base_url: String,

    pub request: RequestYaml,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    /// Pacing between iterations of one VU.
    #[serde(default)]
    pub sleep: Option<YamlDuration>,

    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    #[serde(default)]
    pub threshold_interval: Option<YamlDuration>,

    /// Tags added to every sample of the run.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub checks: Vec<CheckYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdListYaml>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum MethodYaml {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<MethodYaml> for Method {
    fn from(value: MethodYaml) -> Self {
        match value {
            MethodYaml::Get => Method::GET,
            MethodYaml::Head => Method::HEAD,
            MethodYaml::Post => Method::POST,
            MethodYaml::Put => Method::PUT,
            MethodYaml::Patch => Method::PATCH,
            MethodYaml::Delete => Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    #[serde(default)]
    pub method: MethodYaml,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub duration: YamlDuration,
    pub target: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CheckYaml {
    pub name: String,

    #[serde(default)]
    pub status: Option<u16>,

    #[serde(default)]
    pub max_duration: Option<YamlDuration>,

    #[serde(default)]
    pub header: Option<String>,

    #[serde(default)]
    pub contains: Option<String>,

    #[serde(default)]
    pub json_array: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdListYaml {
    Many(Vec<ThresholdYaml>),
    One(ThresholdYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdYaml {
    Expr(String),
    Rule(ThresholdRuleYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ThresholdRuleYaml {
    pub threshold: String,

    #[serde(default)]
    pub abort_on_fail: bool,

    #[serde(default)]
    pub delay_abort_eval: Option<YamlDuration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 30s, 1m30s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Everything a run needs, resolved from a test file plus CLI overrides.
#[derive(Debug)]
pub(crate) struct TestPlan {
    pub profile: RunProfile,
    pub options: RunOptions,
    pub thresholds: ThresholdSet,
    pub workload: HttpWorkload,
}

pub(crate) async fn load(
    path: &Path,
    env: &EnvVars,
    stage_overrides: &[Stage],
) -> Result<TestPlan, RunError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read test file: {}", path.display()))
        .map_err(RunError::InvalidInput)?;

    let doc = parse(&raw, env)
        .with_context(|| format!("invalid test file: {}", path.display()))
        .map_err(RunError::InvalidInput)?;

    doc.into_plan(stage_overrides)
}

pub(crate) fn parse(raw: &str, env: &EnvVars) -> anyhow::Result<TestFileYaml> {
    let expanded = env::expand(raw, env)?;
    let doc: TestFileYaml = serde_yaml::from_str(&expanded)?;
    Ok(doc)
}

impl TestFileYaml {
    pub(crate) fn into_plan(self, stage_overrides: &[Stage]) -> Result<TestPlan, RunError> {
        let stages = if stage_overrides.is_empty() {
            self.stages
                .iter()
                .map(|s| Stage::new(s.duration.into_inner(), s.target))
                .collect()
        } else {
            stage_overrides.to_vec()
        };
        let profile =
            RunProfile::new(stages).map_err(|e| RunError::from_core("invalid stages", e))?;

        let mut options = RunOptions {
            pacing: self
                .sleep
                .map(YamlDuration::into_inner)
                .filter(|d| !d.is_zero()),
            graceful_stop: self.graceful_stop.map(YamlDuration::into_inner),
            tags: TagSet::from_pairs(&self.tags),
            ..RunOptions::default()
        };
        if let Some(interval) = self.threshold_interval {
            options.threshold_interval = interval.into_inner();
        }

        let thresholds = ThresholdSet::compile(threshold_rules(self.thresholds))
            .map_err(|e| RunError::from_core("invalid thresholds", e))?;

        let request = build_request(&self.base_url, &self.request).map_err(RunError::InvalidInput)?;
        let checks = self
            .checks
            .into_iter()
            .map(check_def)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(RunError::InvalidInput)?;

        Ok(TestPlan {
            profile,
            options,
            thresholds,
            workload: HttpWorkload::new(HttpClient::default(), request, checks),
        })
    }
}

fn threshold_rules(thresholds: BTreeMap<String, ThresholdListYaml>) -> Vec<ThresholdRule> {
    let mut rules = Vec::new();
    for (selector, list) in thresholds {
        let entries = match list {
            ThresholdListYaml::Many(entries) => entries,
            ThresholdListYaml::One(entry) => vec![entry],
        };
        for entry in entries {
            let rule = match entry {
                ThresholdYaml::Expr(expr) => ThresholdRule::new(selector.as_str(), expr),
                ThresholdYaml::Rule(r) => {
                    let rule = ThresholdRule::new(selector.as_str(), r.threshold);
                    if r.abort_on_fail {
                        let delay = r
                            .delay_abort_eval
                            .map(YamlDuration::into_inner)
                            .unwrap_or_default();
                        rule.abort_on_fail(delay)
                    } else {
                        rule
                    }
                }
            };
            rules.push(rule);
        }
    }
    rules
}

fn build_request(base_url: &str, req: &RequestYaml) -> anyhow::Result<HttpRequest> {
    let url = join_url(base_url, &req.path);
    let mut request = HttpRequest::new(req.method.into(), &url)
        .with_context(|| format!("invalid request url: {url}"))?;

    for (name, value) in &req.headers {
        request = request
            .header(name, value)
            .with_context(|| format!("invalid request header `{name}`"))?;
    }
    if let Some(body) = &req.body {
        request = request.body(body.clone());
    }

    let timeout = req
        .timeout
        .map_or(DEFAULT_REQUEST_TIMEOUT, YamlDuration::into_inner);
    if timeout.is_zero() {
        anyhow::bail!("request timeout must be greater than zero");
    }
    Ok(request.timeout(timeout))
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn check_def(check: CheckYaml) -> anyhow::Result<CheckDef> {
    let CheckYaml {
        name,
        status,
        max_duration,
        header,
        contains,
        json_array,
    } = check;

    let mut rules = Vec::new();
    if let Some(status) = status {
        rules.push(CheckRule::Status(status));
    }
    if let Some(max) = max_duration {
        rules.push(CheckRule::MaxDuration(max.into_inner()));
    }
    match (header, contains) {
        (Some(header), Some(needle)) => rules.push(CheckRule::HeaderContains { header, needle }),
        (None, None) => {}
        _ => anyhow::bail!("check `{name}`: `header` and `contains` must be given together"),
    }
    if let Some(expected) = json_array {
        rules.push(CheckRule::JsonArray(expected));
    }

    let rule = match rules.len() {
        1 => rules.remove(0),
        0 => anyhow::bail!(
            "check `{name}` has no condition (expected one of status, maxDuration, header+contains, jsonArray)"
        ),
        _ => anyhow::bail!("check `{name}` has more than one condition; split it into separate checks"),
    };

    Ok(CheckDef {
        name: Arc::from(name),
        rule,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS_TEST: &str = r#"
baseUrl: ${BASE_URL:-http://localhost:8000}
request:
  method: GET
  path: /user/users
  headers: { accept: application/json }
  timeout: 10s
stages:
  - { duration: 30s, target: 1000 }
  - { duration: 30s, target: 1500 }
  - { duration: 30s, target: 0 }
sleep: 2.1s
gracefulStop: 30s
thresholdInterval: 2s
tags: { test: users }
checks:
  - { name: "status is 200", status: 200 }
  - { name: "response time < 500ms", maxDuration: 500ms }
  - { name: "has JSON content type", header: content-type, contains: application/json }
  - { name: "returns array of users", jsonArray: true }
thresholds:
  http_req_duration: ["p(95)<500"]
  http_req_failed:
    - threshold: "rate<0.01"
      abortOnFail: true
      delayAbortEval: 10s
"#;

    fn plan(raw: &str, env: &EnvVars, overrides: &[Stage]) -> TestPlan {
        let doc = parse(raw, env).unwrap_or_else(|e| panic!("{e:#}"));
        doc.into_plan(overrides).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn full_test_file_builds_a_plan() {
        let plan = plan(USERS_TEST, &EnvVars::new(), &[]);

        assert_eq!(
            plan.profile.stages(),
            &[
                Stage::new(Duration::from_secs(30), 1000),
                Stage::new(Duration::from_secs(30), 1500),
                Stage::new(Duration::from_secs(30), 0),
            ]
        );
        assert_eq!(plan.options.pacing, Some(Duration::from_millis(2100)));
        assert_eq!(plan.options.graceful_stop, Some(Duration::from_secs(30)));
        assert_eq!(plan.options.threshold_interval, Duration::from_secs(2));
        assert_eq!(plan.options.tags.get("test"), Some("users"));

        assert_eq!(plan.thresholds.len(), 2);
        assert!(plan.thresholds.has_abort_rules());

        let req = plan.workload.request();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri().to_string(), "http://localhost:8000/user/users");

        let checks = plan.workload.checks();
        assert_eq!(checks.len(), 4);
        assert_eq!(checks[0].rule, CheckRule::Status(200));
        assert_eq!(
            checks[1].rule,
            CheckRule::MaxDuration(Duration::from_millis(500))
        );
        assert_eq!(checks[3].rule, CheckRule::JsonArray(true));
    }

    #[test]
    fn env_and_stage_overrides_apply() {
        let env: EnvVars = [("BASE_URL".to_string(), "http://10.1.2.3:9000/".to_string())]
            .into_iter()
            .collect();
        let overrides = [Stage::new(Duration::from_secs(5), 2)];

        let plan = plan(USERS_TEST, &env, &overrides);

        assert_eq!(plan.profile.stages(), &overrides);
        assert_eq!(
            plan.workload.request().uri().to_string(),
            "http://10.1.2.3:9000/user/users"
        );
    }

    #[test]
    fn numeric_durations_are_seconds() {
        let raw = "baseUrl: http://h\nrequest: { path: x }\nstages: [{ duration: 1.5, target: 3 }]\nsleep: 0\n";
        let plan = plan(raw, &EnvVars::new(), &[]);
        assert_eq!(
            plan.profile.stages(),
            &[Stage::new(Duration::from_millis(1500), 3)]
        );
        assert_eq!(plan.options.pacing, None);
        assert_eq!(plan.workload.request().uri().to_string(), "http://h/x");
    }

    #[test]
    fn invalid_documents_are_invalid_input() {
        let cases = [
            // no stages
            "baseUrl: http://h\nrequest: { path: / }\n",
            // zero-length stage
            "baseUrl: http://h\nrequest: { path: / }\nstages: [{ duration: 0s, target: 1 }]\n",
            // bad threshold syntax
            "baseUrl: http://h\nrequest: { path: / }\nstages: [{ duration: 1s, target: 1 }]\nthresholds: { http_req_failed: ['rate<<1'] }\n",
            // check without a condition
            "baseUrl: http://h\nrequest: { path: / }\nstages: [{ duration: 1s, target: 1 }]\nchecks: [{ name: nothing }]\n",
            // unsupported scheme
            "baseUrl: ftp://h\nrequest: { path: / }\nstages: [{ duration: 1s, target: 1 }]\n",
        ];

        for raw in cases {
            let doc = parse(raw, &EnvVars::new()).unwrap_or_else(|e| panic!("{e:#}"));
            match doc.into_plan(&[]) {
                Ok(_) => panic!("expected error for:\n{raw}"),
                Err(err) => assert_eq!(
                    err.exit_code(),
                    crate::exit_codes::ExitCode::InvalidInput,
                    "{err}"
                ),
            }
        }
    }

    #[test]
    fn unknown_keys_and_bad_methods_fail_to_parse() {
        assert!(parse("baseUrl: http://h\nrequest: {}\nvus: 10\n", &EnvVars::new()).is_err());
        assert!(
            parse(
                "baseUrl: http://h\nrequest: { method: TRACE }\n",
                &EnvVars::new()
            )
            .is_err()
        );
        assert!(parse("baseUrl: ${NOPE}\nrequest: {}\n", &EnvVars::new()).is_err());
    }

    #[test]
    fn single_threshold_string_is_accepted() {
        let raw = "baseUrl: http://h\nrequest: {}\nstages: [{ duration: 1s, target: 1 }]\nthresholds: { iterations: 'count>0' }\n";
        let plan = plan(raw, &EnvVars::new(), &[]);
        assert_eq!(plan.thresholds.len(), 1);
        assert!(!plan.thresholds.has_abort_rules());
    }
}
