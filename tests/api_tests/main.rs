//! Router tests, driven in-process without a socket

mod budget_tests;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use stratakv::api::{create_router, AppState};
use stratakv::config::{Config, ConfigBuilder};
use stratakv::engine::Engine;
use stratakv::governor::Governor;
use tempfile::TempDir;
use tower::ServiceExt;

// =============================================================================
// Helper Functions
// =============================================================================

pub fn test_config(dir: &Path) -> ConfigBuilder {
    Config::builder()
        .data_dir(dir)
        .worker_threads(2)
        .memtable_size_limit(64 * 1024)
        .compaction_trigger(0)
        .request_timeout_ms(5_000)
}

pub struct TestApp {
    _temp: TempDir,
    pub engine: Arc<Engine>,
    pub governor: Arc<Governor>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|builder| builder)
    }

    pub fn with_config(configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        let temp = TempDir::new().unwrap();
        let config = configure(test_config(temp.path())).build();
        let engine = Arc::new(Engine::open(config.clone()).unwrap());
        let governor = Arc::new(Governor::new(config.worker_threads, config.max_buffered_bytes));
        let router = create_router(AppState::new(
            Arc::clone(&engine),
            Arc::clone(&governor),
            &config,
        ));

        Self {
            _temp: temp,
            engine,
            governor,
            router,
        }
    }

    pub async fn send(&self, method: &str, uri: &str, body: impl Into<Body>) -> Answer {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .unwrap();
        self.send_request(request).await
    }

    pub async fn send_request(&self, request: Request<Body>) -> Answer {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        Answer {
            status,
            headers,
            body,
        }
    }
}

#[derive(Debug)]
pub struct Answer {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Answer {
    pub fn is_closing(&self) -> bool {
        self.headers
            .get("connection")
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"close"))
    }
}

/// Poll `condition` for up to ten seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
