use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

use crate::{Error, HttpRequest, HttpResponse, Result};

/// Pooled HTTP/1 client shared by every virtual user of a run.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // Unreachable hosts would otherwise hang on the OS connect timeout.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);
        http_connector.set_nodelay(true);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);
        Self { inner }
    }

    /// Sends `req` and reads the whole response body. The request timeout covers both.
    pub async fn send(&self, req: &HttpRequest) -> Result<HttpResponse> {
        match req.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(req))
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => self.exchange(req).await,
        }
    }

    async fn exchange(&self, req: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = Request::builder()
            .method(req.method.clone())
            .uri(req.uri.clone());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(req.headers.clone());
        }
        let request = builder.body(Full::new(req.body.clone()))?;

        let (parts, body) = self.inner.request(request).await?.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            headers: parts.headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpTransportErrorKind;
    use std::time::Instant;

    #[tokio::test]
    async fn unreachable_host_fails_fast_with_connect_timeout() {
        let client = HttpClient::new(Some(Duration::from_millis(200)));
        let req = HttpRequest::get("http://192.0.2.1:81/").unwrap_or_else(|e| panic!("{e}"));

        let started = Instant::now();
        let err = match client.send(&req).await {
            Ok(res) => panic!("expected failure, got status {}", res.status),
            Err(e) => e,
        };
        let elapsed = started.elapsed();

        assert!(
            elapsed < Duration::from_secs(2),
            "expected fast failure, elapsed={elapsed:?}"
        );
        assert!(matches!(
            err.transport_error_kind(),
            HttpTransportErrorKind::Connect | HttpTransportErrorKind::Request
        ));
    }

    #[tokio::test]
    async fn request_timeout_is_reported_as_timeout() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let addr = listener.local_addr().unwrap_or_else(|e| panic!("{e}"));
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = HttpClient::default();
        let req = HttpRequest::get(&format!("http://{addr}/"))
            .unwrap_or_else(|e| panic!("{e}"))
            .timeout(Duration::from_millis(100));

        let err = match client.send(&req).await {
            Ok(res) => panic!("expected timeout, got status {}", res.status),
            Err(e) => e,
        };
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(err.transport_error_kind().to_string(), "timeout");
        silent.abort();
    }
}
