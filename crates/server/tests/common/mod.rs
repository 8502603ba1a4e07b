//! Common test utilities for router testing with mocks.
//!
//! This module provides a test fixture that creates an in-process router
//! backed by mock engines and a temporary artifact tree, enabling end-to-end
//! testing without any models installed.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use podcast_jobs_core::{
    testing::MockEngines, ArtifactKind, ArtifactStore, Config, Dispatcher, EpisodeRef,
    FsJobStatusStore, StagePool, StageRunner,
};

/// Re-export fixtures for test convenience
pub use podcast_jobs_core::testing::fixtures;

/// Podcast provisioned by every fixture.
pub const PODCAST: &str = "p1";

/// Test fixture for router testing with mock engines.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_tts() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/tts", json!({
///         "podcast_id": "p1",
///         "episode_id": "e1",
///         "text": "Hello."
///     })).await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock engines - configure failures and delays
    pub mocks: MockEngines,
    /// Dispatcher behind the router
    pub dispatcher: Arc<Dispatcher>,
    pub artifacts: ArtifactStore,
    pub config: Config,
    /// Temporary directory holding podcasts and speakers
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Raw body text
    pub text: String,
    /// Body parsed as JSON, `Null` when it is not JSON
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with default settings.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test fixture with an adjusted configuration.
    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = fixtures::config(temp_dir.path());
        adjust(&mut config);
        fixtures::provision_podcast(&config.storage, PODCAST);
        fixtures::provision_speaker(&config.storage, "Default");

        let artifacts = ArtifactStore::new(&config.storage);
        let mocks = MockEngines::new();
        let runner = StageRunner::new(
            artifacts.clone(),
            Arc::new(FsJobStatusStore::new(artifacts.clone())),
            mocks.engines(),
            Arc::new(StagePool::new(&config.stages)),
            config.chunking.clone(),
        );
        let dispatcher = Arc::new(Dispatcher::new(&config.dispatcher, Arc::new(runner)));

        let state = Arc::new(podcast_jobs_server::state::AppState::new(
            config.clone(),
            Arc::clone(&dispatcher),
        ));
        let router = podcast_jobs_server::api::create_router(state);

        Self {
            router,
            mocks,
            dispatcher,
            artifacts,
            config,
            temp_dir,
        }
    }

    /// Path of an artifact of an episode in the fixture podcast.
    pub fn artifact(&self, episode_id: &str, kind: ArtifactKind) -> PathBuf {
        self.artifacts
            .resolve(&EpisodeRef::new(PODCAST, episode_id), kind)
    }

    /// Wait for every accepted pipeline to finish.
    pub async fn wait_idle(&self) {
        assert!(
            self.dispatcher.wait_idle(Duration::from_secs(10)).await,
            "pipelines did not finish in time"
        );
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            headers,
            text,
            body,
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status, $response.status, $response.text
        );
    };
}
