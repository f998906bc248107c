//! Common test utilities for E2E testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with mock stage handlers injected, so the whole session lifecycle can be
//! driven over HTTP without external processing scripts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use ezbids_core::{
    testing::MockStageHandler, Config, DatabaseConfig, PollerConfig, ServerConfig,
    SessionStore, SqliteSessionStore, Stage, StageHandler, StagePoller, WorkdirLayout,
    WorkspaceConfig,
};
use ezbids_server::{create_router, AppState};

/// Re-export fixtures for test convenience
pub use ezbids_core::testing::fixtures;

/// Multipart boundary used by [`TestFixture::upload`].
const BOUNDARY: &str = "ezbids-test-boundary";

/// Test fixture for E2E testing with mock stage handlers.
///
/// The poller is never started; tests call [`TestFixture::poll`] to run one
/// cycle and then wait for the session to settle.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Poller wired to the mock handlers
    pub poller: Arc<StagePoller>,
    /// Mock preprocess handler (writes `list` and `ezBIDS_core.json`)
    pub preprocess: Arc<MockStageHandler>,
    /// Mock deface handler (writes both ledgers)
    pub deface: Arc<MockStageHandler>,
    /// Mock finalize handler (writes a BIDS dataset description)
    pub finalize: Arc<MockStageHandler>,
    /// Root of the session working directories
    pub workspace: PathBuf,
    /// Temporary directory for the database and working directories
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub bytes: Vec<u8>,
}

impl TestFixture {
    /// Create a new test fixture with succeeding mock handlers.
    pub async fn new() -> Self {
        let preprocess = MockStageHandler::succeeding(Stage::Preprocess, "analyzed 1 inputs")
            .with_artifact("list", "dicom/series1\n")
            .with_artifact("ezBIDS_core.json", fixtures::analysis_json(2));
        let deface = MockStageHandler::succeeding(Stage::Deface, "1 defaced, 1 failed")
            .with_artifact("deface.out", "{'id': 'A', 'defaced': 'A_defaced.nii.gz'}\n")
            .with_artifact("deface.failed", "{'id': 'B'}\n");
        let finalize = MockStageHandler::succeeding(Stage::Finalize, "BIDS dataset study generated")
            .with_artifact(
                "bids/study/dataset_description.json",
                br#"{"Name": "Test Study"}"#.to_vec(),
            );
        Self::with_handlers(preprocess, deface, finalize).await
    }

    /// Create a test fixture with custom handlers.
    pub async fn with_handlers(
        preprocess: MockStageHandler,
        deface: MockStageHandler,
        finalize: MockStageHandler,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let workspace = temp_dir.path().join("workdir");
        std::fs::create_dir_all(&workspace).expect("Failed to create workspace");

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
                ..ServerConfig::default()
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            workspace: WorkspaceConfig {
                root: workspace.clone(),
            },
            poller: PollerConfig {
                poll_interval_ms: 20,
                max_concurrent_handlers: 2,
                ..PollerConfig::default()
            },
            ..Config::default()
        };

        let store: Arc<dyn SessionStore> = Arc::new(
            SqliteSessionStore::new(&db_path).expect("Failed to create session store"),
        );

        let preprocess = Arc::new(preprocess);
        let deface = Arc::new(deface);
        let finalize = Arc::new(finalize);
        let poller = Arc::new(StagePoller::new(
            config.poller.clone(),
            Arc::clone(&store),
            WorkdirLayout::new(workspace.clone()),
            vec![
                Arc::clone(&preprocess) as Arc<dyn StageHandler>,
                Arc::clone(&deface) as Arc<dyn StageHandler>,
                Arc::clone(&finalize) as Arc<dyn StageHandler>,
            ],
        ));

        let state = Arc::new(AppState::new(config, store, Some(Arc::clone(&poller))));
        let router = create_router(state);

        Self {
            router,
            poller,
            preprocess,
            deface,
            finalize,
            workspace,
            temp_dir,
        }
    }

    /// Working directory of a session.
    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.workspace.join(id)
    }

    /// Run one poll cycle of every stage.
    pub async fn poll(&self) -> usize {
        self.poller.poll_once().await
    }

    /// Poll the session record until it reaches `status`.
    pub async fn wait_for_status(&self, id: &str, status: &str) -> TestResponse {
        let path = format!("/api/v1/sessions/{}", id);
        for _ in 0..100 {
            let response = self.get(&path).await;
            if response.body["status"] == status {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let response = self.get(&path).await;
        panic!(
            "Session {} never reached {}: {}",
            id, status, response.body
        );
    }

    /// Create a session and return its id.
    pub async fn create_session(&self) -> String {
        let response = self.post_empty("/api/v1/sessions").await;
        assert_eq!(response.status, StatusCode::CREATED);
        response.body["id"]
            .as_str()
            .expect("session id")
            .to_string()
    }

    /// Create a session and drive it to `analyzed`.
    pub async fn analyzed_session(&self) -> String {
        let id = self.create_session().await;
        let response = self
            .upload(&id, &[("dicom/series1/img0001.dcm", b"DICM")])
            .await;
        assert_eq!(response.status, StatusCode::OK);
        let response = self
            .post_empty(&format!("/api/v1/sessions/{}/upload-complete", id))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        self.poll().await;
        self.wait_for_status(&id, "analyzed").await;
        id
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

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        self.request_raw(
            "POST",
            path,
            Body::from(body.to_string()),
            "application/json",
        )
        .await
    }

    /// Upload files to a session as one multipart request.
    pub async fn upload(&self, id: &str, files: &[(&str, &[u8])]) -> TestResponse {
        let mut body = Vec::new();
        for (name, contents) in files {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, name
                )
                .as_bytes(),
            );
            body.extend_from_slice(contents);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        self.request_raw(
            "POST",
            &format!("/api/v1/sessions/{}/files", id),
            Body::from(body),
            &format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .await
    }

    /// Send a request with a raw body and custom content type.
    async fn request_raw(
        &self,
        method: &str,
        path: &str,
        body: Body,
        content_type: &str,
    ) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("Content-Type", content_type)
            .body(body)
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

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            body,
            bytes: body_bytes.to_vec(),
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
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
