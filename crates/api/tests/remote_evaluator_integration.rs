//! Integration tests for assessments evaluated by a remote service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::{eventually, get_request, parse_response_body, TestApp, ADMIN_KEY};
use compliance_orchestrator_api::config::{EvaluatorConfig, EvaluatorMode};
use compliance_orchestrator_api::services::RemoteComplianceEvaluator;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn remote_evaluator(server: &MockServer) -> Arc<RemoteComplianceEvaluator> {
    let config = EvaluatorConfig {
        mode: EvaluatorMode::Remote,
        url: server.uri(),
        token: "evaluator-token".to_string(),
        timeout_ms: 2_000,
    };
    Arc::new(RemoteComplianceEvaluator::new(&config).unwrap())
}

#[tokio::test]
async fn test_remote_result_is_normalized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .and(header("authorization", "Bearer evaluator-token"))
        .and(body_partial_json(json!({"assessmentType": "security", "source": "remote-test"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "overallScore": 140.0,
            "servers": [],
            "issues": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::with_evaluator(|_| {}, remote_evaluator(&server)).await;
    let id = app
        .request_assessment(json!({"assessmentType": "security", "source": "remote-test"}))
        .await;

    let response = app
        .send(get_request(
            &format!("/api/v1/assessment/results/{}?timeout=3000", id),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let result = parse_response_body(response).await;
    assert_eq!(result["overallScore"], 100.0);
    assert!(result["evaluatedAt"].is_string());

    let response = app
        .send(get_request("/api/v1/assessment/processor", ADMIN_KEY))
        .await;
    let body = parse_response_body(response).await;
    assert_eq!(body["metrics"]["evaluator"], "remote");
}

#[tokio::test]
async fn test_rejected_request_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unsupported assessment"))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::with_evaluator(|_| {}, remote_evaluator(&server)).await;
    let id = app
        .request_assessment(json!({"assessmentType": "performance", "source": "remote-test"}))
        .await;

    let response = app
        .send(get_request(
            &format!("/api/v1/assessment/results/{}?timeout=3000", id),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"]["code"], "failed");
    assert_eq!(body["error"]["retryable"], false);

    let response = app
        .send(get_request(&format!("/api/v1/assessment/status/{}", id), ADMIN_KEY))
        .await;
    let status = parse_response_body(response).await;
    assert_eq!(status["state"], "FAILED");
    assert!(status["nextRetryAt"].is_null());
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "overallScore": 72.5,
            "servers": [],
            "issues": []
        })))
        .mount(&server)
        .await;

    let app = TestApp::with_evaluator(|_| {}, remote_evaluator(&server)).await;
    let id = app
        .request_assessment(json!({"assessmentType": "full", "source": "remote-test"}))
        .await;

    let retry_scheduled = eventually(Duration::from_secs(3), || {
        let app = &app;
        async move {
            let response = app
                .send(get_request(&format!("/api/v1/assessment/status/{}", id), ADMIN_KEY))
                .await;
            parse_response_body(response).await["nextRetryAt"].is_string()
        }
    })
    .await;
    assert!(retry_scheduled, "no retry was scheduled");

    // The retry scan job normally does this.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app.state.processor.enqueue_due(10).await.unwrap(), 1);

    let response = app
        .send(get_request(
            &format!("/api/v1/assessment/results/{}?timeout=4000", id),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(parse_response_body(response).await["overallScore"], 72.5);

    let response = app
        .send(get_request(&format!("/api/v1/assessment/status/{}", id), ADMIN_KEY))
        .await;
    let status = parse_response_body(response).await;
    assert_eq!(status["state"], "COMPLETED");
    assert_eq!(status["retryCount"], 1);
}
