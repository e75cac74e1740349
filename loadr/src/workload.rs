use std::sync::Arc;
use std::time::Duration;

use loadr_core::{IterationContext, IterationError, IterationOutcome, Workload};
use loadr_http::{HttpClient, HttpRequest, HttpResponse};
use loadr_metrics::{MetricKind, Registry, Sample, TagSet};
use tokio::time::Instant;

pub(crate) const HTTP_REQS: &str = "http_reqs";
pub(crate) const HTTP_REQ_DURATION: &str = "http_req_duration";
pub(crate) const HTTP_REQ_FAILED: &str = "http_req_failed";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CheckRule {
    Status(u16),
    MaxDuration(Duration),
    HeaderContains { header: String, needle: String },
    /// Whether the body must (or must not) parse as a JSON array.
    JsonArray(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CheckDef {
    pub name: Arc<str>,
    pub rule: CheckRule,
}

impl CheckDef {
    fn passed(&self, res: &HttpResponse, elapsed: Duration) -> bool {
        match &self.rule {
            CheckRule::Status(status) => res.status == *status,
            CheckRule::MaxDuration(max) => elapsed < *max,
            CheckRule::HeaderContains { header, needle } => res
                .header(header)
                .is_some_and(|v| v.contains(needle.as_str())),
            CheckRule::JsonArray(expected) => {
                let is_array = res
                    .body_utf8()
                    .and_then(|body| serde_json::from_str::<serde_json::Value>(body).ok())
                    .is_some_and(|v| v.is_array());
                is_array == *expected
            }
        }
    }
}

/// Sends one request per iteration and grades the response with the configured checks.
#[derive(Debug)]
pub(crate) struct HttpWorkload {
    client: HttpClient,
    request: HttpRequest,
    checks: Vec<CheckDef>,
}

impl HttpWorkload {
    pub(crate) fn new(client: HttpClient, request: HttpRequest, checks: Vec<CheckDef>) -> Self {
        Self {
            client,
            request,
            checks,
        }
    }

    pub(crate) fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub(crate) fn checks(&self) -> &[CheckDef] {
        &self.checks
    }
}

impl Workload for HttpWorkload {
    fn register_metrics(&self, registry: &Registry) -> loadr_metrics::Result<()> {
        registry.register(HTTP_REQS, MetricKind::Counter)?;
        registry.register(HTTP_REQ_DURATION, MetricKind::Trend)?;
        registry.register(HTTP_REQ_FAILED, MetricKind::Rate)?;
        Ok(())
    }

    async fn iterate(
        &self,
        _ctx: &IterationContext,
    ) -> Result<IterationOutcome, IterationError> {
        let started = Instant::now();
        let result = self.client.send(&self.request).await;
        let elapsed = started.elapsed();

        let mut outcome = IterationOutcome::new();
        outcome.sample(Sample::new(HTTP_REQS, 1.0));

        match result {
            Ok(res) => {
                let status = TagSet::from_pairs([("status", res.status.to_string())]);
                let failed = if res.status >= 400 { 1.0 } else { 0.0 };
                outcome
                    .sample(
                        Sample::new(HTTP_REQ_DURATION, elapsed.as_secs_f64() * 1000.0)
                            .with_tags(status.clone()),
                    )
                    .sample(Sample::new(HTTP_REQ_FAILED, failed).with_tags(status));

                for check in &self.checks {
                    outcome.check(check.name.clone(), check.passed(&res, elapsed));
                }
                Ok(outcome)
            }
            Err(err) => {
                let error = TagSet::from_pairs([("error", err.transport_error_kind().to_string())]);
                outcome.sample(Sample::new(HTTP_REQ_FAILED, 1.0).with_tags(error));
                for check in &self.checks {
                    outcome.check(check.name.clone(), false);
                }
                Err(IterationError::new(err.to_string()).with_outcome(outcome))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadr_testserver::TestServer;

    fn ctx() -> IterationContext {
        IterationContext {
            vu_id: 1,
            iteration: 0,
            started_at: Duration::ZERO,
        }
    }

    fn check(name: &str, rule: CheckRule) -> CheckDef {
        CheckDef {
            name: Arc::from(name),
            rule,
        }
    }

    fn users_checks() -> Vec<CheckDef> {
        vec![
            check("status is 200", CheckRule::Status(200)),
            check(
                "response time < 5s",
                CheckRule::MaxDuration(Duration::from_secs(5)),
            ),
            check(
                "has JSON content type",
                CheckRule::HeaderContains {
                    header: "content-type".to_string(),
                    needle: "application/json".to_string(),
                },
            ),
            check("returns array of users", CheckRule::JsonArray(true)),
        ]
    }

    fn sample_value<'a>(outcome: &'a IterationOutcome, metric: &str) -> Option<&'a Sample> {
        outcome.samples.iter().find(|s| s.metric() == metric)
    }

    #[tokio::test]
    async fn users_endpoint_passes_every_check() {
        let server = TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let request = HttpRequest::get(&server.urls().users).unwrap_or_else(|e| panic!("{e}"));
        let workload = HttpWorkload::new(HttpClient::default(), request, users_checks());

        let outcome = workload
            .iterate(&ctx())
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert!(outcome.checks.iter().all(|c| c.passed), "{:?}", outcome.checks);
        let duration = sample_value(&outcome, HTTP_REQ_DURATION)
            .unwrap_or_else(|| panic!("missing {HTTP_REQ_DURATION}"));
        assert_eq!(duration.tags().get("status"), Some("200"));
        assert!(duration.value() >= 0.0);
        let failed = sample_value(&outcome, HTTP_REQ_FAILED)
            .unwrap_or_else(|| panic!("missing {HTTP_REQ_FAILED}"));
        assert_eq!(failed.value(), 0.0);
        assert_eq!(server.stats().users_total(), 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn error_status_counts_as_failed_request_but_not_failed_iteration() {
        let server = TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let request =
            HttpRequest::get(&server.urls().status(503)).unwrap_or_else(|e| panic!("{e}"));
        let workload = HttpWorkload::new(HttpClient::default(), request, users_checks());

        let outcome = workload
            .iterate(&ctx())
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let by_name = |name: &str| {
            outcome
                .checks
                .iter()
                .find(|c| &*c.name == name)
                .map(|c| c.passed)
        };
        assert_eq!(by_name("status is 200"), Some(false));
        assert_eq!(by_name("response time < 5s"), Some(true));
        assert_eq!(by_name("returns array of users"), Some(false));

        let failed = sample_value(&outcome, HTTP_REQ_FAILED)
            .unwrap_or_else(|| panic!("missing {HTTP_REQ_FAILED}"));
        assert_eq!(failed.value(), 1.0);
        assert_eq!(failed.tags().get("status"), Some("503"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn transport_error_fails_iteration_and_keeps_outcome() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let addr = listener.local_addr().unwrap_or_else(|e| panic!("{e}"));
        drop(listener);

        let request = HttpRequest::get(&format!("http://{addr}/"))
            .unwrap_or_else(|e| panic!("{e}"))
            .timeout(Duration::from_secs(2));
        let workload = HttpWorkload::new(HttpClient::default(), request, users_checks());

        let err = match workload.iterate(&ctx()).await {
            Ok(outcome) => panic!("expected failure, got {outcome:?}"),
            Err(e) => e,
        };
        let outcome = err.into_outcome();

        assert_eq!(outcome.checks.len(), 4);
        assert!(outcome.checks.iter().all(|c| !c.passed));
        assert!(sample_value(&outcome, HTTP_REQ_DURATION).is_none());
        let failed = sample_value(&outcome, HTTP_REQ_FAILED)
            .unwrap_or_else(|| panic!("missing {HTTP_REQ_FAILED}"));
        assert_eq!(failed.value(), 1.0);
        assert!(failed.tags().get("error").is_some());
    }

    #[test]
    fn json_array_check_can_be_negated() {
        let res = HttpResponse {
            status: 200,
            headers: Default::default(),
            body: bytes_of("{\"ok\":true}"),
        };
        let is_array = check("array", CheckRule::JsonArray(true));
        let not_array = check("not array", CheckRule::JsonArray(false));
        assert!(!is_array.passed(&res, Duration::ZERO));
        assert!(not_array.passed(&res, Duration::ZERO));
    }

    #[test]
    fn non_utf8_body_is_not_a_json_array() {
        let res = HttpResponse {
            status: 200,
            headers: Default::default(),
            body: loadr_http::Bytes::from_static(&[b'[', 0xff, b']']),
        };
        let is_array = check("array", CheckRule::JsonArray(true));
        let not_array = check("not array", CheckRule::JsonArray(false));
        assert!(!is_array.passed(&res, Duration::ZERO));
        assert!(not_array.passed(&res, Duration::ZERO));
    }

    fn bytes_of(s: &'static str) -> loadr_http::Bytes {
        loadr_http::Bytes::from_static(s.as_bytes())
    }
}
