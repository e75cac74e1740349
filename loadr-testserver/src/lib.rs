use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_USERS: &str = "/user/users";
pub const PATH_PLAINTEXT: &str = "/plaintext";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_STATUS: &str = "/status/{code}";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    users_total: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Requests served by the users listing.
    pub fn users_total(&self) -> u64 {
        self.users_total.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub users: String,
    pub plaintext: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            users: format!("{base_url}{PATH_USERS}"),
            plaintext: format!("{base_url}{PATH_PLAINTEXT}"),
            base_url,
        }
    }

    pub fn status(&self, code: u16) -> String {
        format!("{}/status/{code}", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct UserProfile {
    id: u64,
    user_name: String,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    balance: f64,
    discount_rate: f64,
    language: Option<String>,
    created_at: &'static str,
}

fn users() -> Vec<UserProfile> {
    (1..=3)
        .map(|id| UserProfile {
            id,
            user_name: format!("user{id}"),
            first_name: Some(format!("First{id}")),
            last_name: None,
            email: Some(format!("user{id}@example.com")),
            balance: 100.0 * id as f64,
            discount_rate: 0.05,
            language: Some("en".to_string()),
            created_at: "2024-01-01T00:00:00Z",
        })
        .collect()
}

async fn handle_users(State(stats): State<TestServerStats>) -> Json<Vec<UserProfile>> {
    stats.inc_requests_total();
    stats.users_total.fetch_add(1, Ordering::Relaxed);
    Json(users())
}

async fn handle_plaintext(State(stats): State<TestServerStats>) -> &'static str {
    stats.inc_requests_total();
    "Hello World!"
}

/// Sleeps `?ms=` milliseconds (default 50) before answering.
async fn handle_slow(
    State(stats): State<TestServerStats>,
    Query(query): Query<HashMap<String, String>>,
) -> &'static str {
    stats.inc_requests_total();
    let ms = query
        .get("ms")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(50);
    sleep(Duration::from_millis(ms)).await;
    "slow"
}

async fn handle_status(
    State(stats): State<TestServerStats>,
    Path(code): Path<u16>,
) -> (StatusCode, String) {
    stats.inc_requests_total();
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, status.to_string())
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_USERS, get(handle_users))
        .route(PATH_PLAINTEXT, get(handle_plaintext))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_STATUS, get(handle_status))
        .with_state(stats)
}

pub struct TestServer {
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            urls: TestServerUrls::new(format!("http://{addr}")),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.urls.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn users_serialize_as_a_json_array() {
        let json = serde_json::to_value(users()).unwrap_or_else(|e| panic!("{e}"));
        let list = json.as_array().unwrap_or_else(|| panic!("expected array"));
        assert_eq!(list.len(), 3);
        assert_eq!(list[0]["user_name"], "user1");
        assert!(list[0]["last_name"].is_null());
    }

    #[test]
    fn urls_are_built_from_base() {
        let urls = TestServerUrls::new("http://127.0.0.1:9".to_string());
        assert_eq!(urls.users, "http://127.0.0.1:9/user/users");
        assert_eq!(urls.status(503), "http://127.0.0.1:9/status/503");
    }
}
