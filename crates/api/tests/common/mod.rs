//! Common test utilities for integration tests.
//!
//! The app runs against the in-memory repositories with the local evaluator
//! pointed at a temporary configuration file, so no database is required.

// Helpers are shared by several test binaries; not every binary uses each one.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use compliance_orchestrator_api::app::{create_app, AppState, Repositories};
use compliance_orchestrator_api::config::{ApiKeyConfig, Config};
use compliance_orchestrator_api::extractors::Permission;
use domain::models::{AuditAction, AuditLogEntry};
use domain::repositories::memory::{
    InMemoryAssessmentRepository, InMemoryAuditLogRepository, InMemoryRemediationRepository,
    InMemorySystemMetricRepository,
};
use domain::services::ComplianceEvaluator;
use shared::crypto::sha256_hex;

/// Holds every permission.
pub const ADMIN_KEY: &str = "co_admin000secretvalue0001";
/// `assessment:read` only.
pub const READER_KEY: &str = "co_reader00secretvalue0002";
/// Well-formed but not configured.
pub const UNKNOWN_KEY: &str = "co_unknown0secretvalue0003";

/// A compliant-enough server document for the local evaluator.
pub fn default_document() -> serde_json::Value {
    serde_json::json!({
        "mcpServers": {
            "github": {
                "command": "npx",
                "args": ["-y", "server-github"],
                "env": {"GITHUB_TOKEN": "${GITHUB_TOKEN}"}
            }
        }
    })
}

/// Test configuration with two API keys and fast processor timings.
pub fn test_config(dir: &TempDir, config_path: PathBuf) -> Config {
    let mut config = Config::default();
    config.security.api_keys = vec![
        ApiKeyConfig {
            name: "admin".to_string(),
            key_hash: sha256_hex(ADMIN_KEY),
            permissions: vec![
                Permission::AssessmentRead,
                Permission::AssessmentWrite,
                Permission::RemediationPropose,
                Permission::RemediationApprove,
                Permission::AuditRead,
            ],
        },
        ApiKeyConfig {
            name: "reader".to_string(),
            key_hash: sha256_hex(READER_KEY),
            permissions: vec![Permission::AssessmentRead],
        },
    ];
    config.processor.interval_ms = 20;
    config.processor.base_delay_ms = 10;
    config.processor.max_delay_ms = 50;
    config.processor.max_jitter_ms = 0;
    config.processor.default_result_wait_ms = 5_000;
    config.execution.backup_dir = dir.path().join("backups");
    config.execution.managed_config_paths = vec![config_path];
    config.execution.command_timeout_secs = 10;
    config
}

/// Running application plus handles for inspecting its storage.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub audit_logs: Arc<InMemoryAuditLogRepository>,
    pub config_path: PathBuf,
    shutdown: CancellationToken,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_document(default_document()).await
    }

    /// App whose local evaluator reads `document`.
    pub async fn with_document(document: serde_json::Value) -> Self {
        Self::build(document, None).await
    }

    /// App that evaluates through `evaluator` instead of the local one.
    pub async fn with_evaluator(config: impl FnOnce(&mut Config), evaluator: Arc<dyn ComplianceEvaluator>) -> Self {
        Self::build_with(default_document(), config, Some(evaluator)).await
    }

    async fn build(document: serde_json::Value, evaluator: Option<Arc<dyn ComplianceEvaluator>>) -> Self {
        Self::build_with(document, |_| {}, evaluator).await
    }

    async fn build_with(
        document: serde_json::Value,
        configure: impl FnOnce(&mut Config),
        evaluator: Option<Arc<dyn ComplianceEvaluator>>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("servers.json");
        std::fs::write(&config_path, serde_json::to_vec_pretty(&document).unwrap()).unwrap();

        let mut config = test_config(&dir, config_path.clone());
        configure(&mut config);

        let audit_logs = Arc::new(InMemoryAuditLogRepository::new());
        let repositories = Repositories {
            assessments: Arc::new(InMemoryAssessmentRepository::new()),
            audit_logs: audit_logs.clone(),
            remediation: Arc::new(InMemoryRemediationRepository::new()),
            metrics: Arc::new(InMemorySystemMetricRepository::new()),
        };

        let state = match evaluator {
            Some(evaluator) => AppState::with_evaluator(config, repositories, None, evaluator),
            None => AppState::build(config, repositories, None).unwrap(),
        };

        let shutdown = CancellationToken::new();
        state.processor.start(shutdown.child_token());

        Self {
            router: create_app(state.clone()),
            state,
            audit_logs,
            config_path,
            shutdown,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn audit_entries(&self, action: AuditAction) -> Vec<AuditLogEntry> {
        self.audit_logs
            .entries()
            .await
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }

    /// Request an assessment and return its id.
    pub async fn request_assessment(&self, body: serde_json::Value) -> uuid::Uuid {
        let response = self
            .send(json_request(Method::POST, "/api/v1/assessment/request", body, ADMIN_KEY))
            .await;
        assert_eq!(response.status(), axum::http::StatusCode::ACCEPTED);
        let body = parse_response_body(response).await;
        body["assessmentId"].as_str().unwrap().parse().unwrap()
    }

    /// Request a full assessment and wait for its result.
    pub async fn completed_assessment(&self) -> uuid::Uuid {
        let id = self
            .request_assessment(serde_json::json!({"assessmentType": "full", "source": "test"}))
            .await;
        let response = self
            .send(get_request(
                &format!("/api/v1/assessment/results/{}?timeout=5000", id),
                ADMIN_KEY,
            ))
            .await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        id
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll `check` every 20ms until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Build a JSON request with authentication.
pub fn json_request(method: Method, uri: &str, body: serde_json::Value, key: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", key))
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Build a GET request with authentication.
pub fn get_request(uri: &str, key: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", key))
        .body(Body::empty())
        .unwrap()
}

/// Build a DELETE request with authentication.
pub fn delete_request(uri: &str, key: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", key))
        .body(Body::empty())
        .unwrap()
}

/// Helper to parse JSON response body.
pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}
