//! Integration tests for assessment endpoints.
//!
//! Run with: cargo test --test assessments_integration

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use common::{
    delete_request, get_request, json_request, parse_response_body, TestApp, ADMIN_KEY,
    READER_KEY,
};
use domain::models::{AssessmentRequest, AssessmentResult, AuditAction};
use domain::services::{ComplianceEvaluator, EvaluationError};
use serde_json::json;
use uuid::Uuid;

/// Never finishes on its own.
struct StalledEvaluator;

#[async_trait]
impl ComplianceEvaluator for StalledEvaluator {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn evaluate(
        &self,
        _assessment_id: Uuid,
        _request: &AssessmentRequest,
    ) -> Result<AssessmentResult, EvaluationError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(EvaluationError::Timeout(60_000))
    }
}

/// Always reports the service as down.
struct UnavailableEvaluator;

#[async_trait]
impl ComplianceEvaluator for UnavailableEvaluator {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn evaluate(
        &self,
        _assessment_id: Uuid,
        _request: &AssessmentRequest,
    ) -> Result<AssessmentResult, EvaluationError> {
        Err(EvaluationError::Unavailable("connection refused".to_string()))
    }
}

// ============================================================================
// Request and results
// ============================================================================

#[tokio::test]
async fn test_request_and_wait_for_result() {
    let app = TestApp::new().await;

    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/assessment/request",
            json!({"assessmentType": "full", "source": "integration-test"}),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "requested");
    assert!(body["estimatedTime"].as_u64().unwrap() > 0);
    let id = body["assessmentId"].as_str().unwrap().to_string();

    let response = app
        .send(get_request(
            &format!("/api/v1/assessment/results/{}?timeout=5000", id),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let result = parse_response_body(response).await;
    let score = result["overallScore"].as_f64().unwrap();
    assert!((0.0..=100.0).contains(&score));
    assert!(result["servers"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s["serverName"] == "github"));

    let completed = app.audit_entries(AuditAction::AssessmentCompleted).await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].target, id);
    assert_eq!(app.audit_entries(AuditAction::AssessmentRequested).await[0].actor, "admin");

    let response = app
        .send(get_request(&format!("/api/v1/assessment/status/{}", id), READER_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let status = parse_response_body(response).await;
    assert_eq!(status["state"], "COMPLETED");
    assert_eq!(status["progress"], 100);
    assert!(status["completedAt"].is_string());
    assert!(status["lastUpdated"].is_string());
}

#[tokio::test]
async fn test_request_validation() {
    let app = TestApp::new().await;

    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/assessment/request",
            json!({"assessmentType": "full", "source": ""}),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
    assert_eq!(body["error"]["retryable"], false);

    // Malformed bodies never reach the handler.
    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/assessment/request",
            json!({"assessmentType": "nonsense", "source": "x"}),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_assessment_is_not_found_and_audited() {
    let app = TestApp::new().await;
    let id = Uuid::new_v4();

    let response = app
        .send(get_request(&format!("/api/v1/assessment/status/{}", id), ADMIN_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"]["code"], "not_found");

    let errors = app.audit_entries(AuditAction::ApiError).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].target, id.to_string());
    assert_eq!(errors[0].details["code"], "not_found");
    assert_eq!(errors[0].details["operation"], "assessment.status");
}

#[tokio::test]
async fn test_result_wait_times_out() {
    let app = TestApp::with_evaluator(|_| {}, Arc::new(StalledEvaluator)).await;
    let id = app
        .request_assessment(json!({"assessmentType": "security", "source": "test"}))
        .await;

    let response = app
        .send(get_request(
            &format!("/api/v1/assessment/results/{}?timeout=100", id),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"]["code"], "timeout");
    assert_eq!(body["error"]["retryable"], true);
}

#[tokio::test]
async fn test_open_breaker_surfaces_circuit_open() {
    let app = TestApp::with_evaluator(
        |config| {
            config.circuit_breaker.failure_threshold = 1;
            config.circuit_breaker.reset_timeout_secs = 60;
        },
        Arc::new(UnavailableEvaluator),
    )
    .await;
    let id = app
        .request_assessment(json!({"assessmentType": "full", "source": "test"}))
        .await;

    let response = app
        .send(get_request(
            &format!("/api/v1/assessment/results/{}?timeout=300", id),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"]["code"], "circuit_open");
    assert_eq!(body["error"]["retryable"], true);

    // The breaker deferred the retry instead of consuming it.
    let response = app
        .send(get_request(&format!("/api/v1/assessment/status/{}", id), ADMIN_KEY))
        .await;
    let status = parse_response_body(response).await;
    assert_eq!(status["state"], "FAILED");
    assert!(status["retryCount"].as_i64().unwrap() <= 1);
    assert!(status["nextRetryAt"].is_string());

    let response = app.send(get_request("/api/health", ADMIN_KEY)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health = parse_response_body(response).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["evaluator"]["available"], false);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let app = TestApp::with_evaluator(|_| {}, Arc::new(StalledEvaluator)).await;
    let id = app
        .request_assessment(json!({"assessmentType": "full", "source": "test"}))
        .await;

    let response = app
        .send(json_request(
            Method::DELETE,
            &format!("/api/v1/assessment/{}", id),
            json!({"reason": "superseded"}),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["cancelled"], true);
    assert_eq!(body["state"], "CANCELLED");

    let response = app
        .send(delete_request(&format!("/api/v1/assessment/{}", id), ADMIN_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["cancelled"], false);
    assert_eq!(body["state"], "CANCELLED");

    let cancelled = app.audit_entries(AuditAction::AssessmentCancelled).await;
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].details["reason"], "superseded");

    let response = app
        .send(get_request(
            &format!("/api/v1/assessment/results/{}?timeout=100", id),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"]["code"], "cancelled");
}

#[tokio::test]
async fn test_cancel_requires_write_permission() {
    let app = TestApp::new().await;
    let id = app.completed_assessment().await;

    let response = app
        .send(delete_request(&format!("/api/v1/assessment/{}", id), READER_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let errors = app.audit_entries(AuditAction::ApiError).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].actor, "reader");
}

// ============================================================================
// Listing and statistics
// ============================================================================

#[tokio::test]
async fn test_list_and_statistics() {
    let app = TestApp::new().await;
    let first = app.completed_assessment().await;
    let second = app.completed_assessment().await;

    let response = app
        .send(get_request("/api/v1/assessment/list?state=completed&limit=1", ADMIN_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], second.to_string());
    assert_eq!(data[0]["assessmentType"], "full");
    assert_eq!(body["pagination"]["total"], 2);
    assert_eq!(body["pagination"]["hasMore"], true);

    let response = app
        .send(get_request("/api/v1/assessment/list?offset=1", ADMIN_KEY))
        .await;
    let body = parse_response_body(response).await;
    assert_eq!(body["data"][0]["id"], first.to_string());

    let response = app
        .send(get_request("/api/v1/assessment/list?state=bogus", ADMIN_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(get_request("/api/v1/assessment/statistics", READER_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = parse_response_body(response).await;
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["completed"], 2);
    assert_eq!(stats["pending"], 0);
}

#[tokio::test]
async fn test_processor_status() {
    let app = TestApp::new().await;
    app.completed_assessment().await;

    let response = app
        .send(get_request("/api/v1/assessment/processor", READER_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["metrics"]["evaluator"], "local");
    assert_eq!(body["metrics"]["succeeded"], 1);
    assert_eq!(body["metrics"]["circuitBreaker"]["state"], "closed");
    assert_eq!(
        body["queue"]["capacity"],
        app.state.config.processor.max_queue_size
    );
}
