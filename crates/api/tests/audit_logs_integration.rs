//! Integration tests for the audit log endpoint.

mod common;

use axum::http::StatusCode;
use common::{get_request, parse_response_body, TestApp, ADMIN_KEY, READER_KEY};
use domain::models::AuditAction;
use domain::services::AuditLogBuilder;
use serde_json::json;

#[tokio::test]
async fn test_list_filters_by_action_and_actor() {
    let app = TestApp::new().await;
    let id = app.completed_assessment().await;

    let response = app
        .send(get_request(
            "/api/v1/audit/logs?action=assessment_requested&actor=admin",
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["action"], "assessment_requested");
    assert_eq!(data[0]["target"], id.to_string());
    assert_eq!(body["pagination"]["total"], 1);

    let response = app
        .send(get_request(
            &format!("/api/v1/audit/logs?target={}", id),
            ADMIN_KEY,
        ))
        .await;
    let body = parse_response_body(response).await;
    let actions: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"assessment_requested"));
    assert!(actions.contains(&"assessment_completed"));
}

#[tokio::test]
async fn test_pagination() {
    let app = TestApp::new().await;
    for n in 0..5 {
        app.state
            .audit
            .record(
                AuditLogBuilder::actor_action("ops", AuditAction::AssessmentRequested)
                    .on_target(format!("seed-{}", n))
                    .with_detail("n", n),
            )
            .await
            .unwrap();
    }

    let response = app
        .send(get_request("/api/v1/audit/logs?actor=ops&page=2&perPage=2", ADMIN_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(
        body["pagination"],
        json!({"page": 2, "perPage": 2, "total": 5, "totalPages": 3})
    );

    let response = app
        .send(get_request("/api/v1/audit/logs?actor=ops&page=3&perPage=2", ADMIN_KEY))
        .await;
    let body = parse_response_body(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_time_range() {
    let app = TestApp::new().await;

    let response = app
        .send(get_request(
            "/api/v1/audit/logs?from=2026-02-01T00:00:00Z&to=2026-01-01T00:00:00Z",
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"]["code"], "validation_error");

    let response = app
        .send(get_request(
            "/api/v1/audit/logs?from=2020-01-01T00:00:00Z&to=2020-01-02T00:00:00Z",
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_requires_audit_permission() {
    let app = TestApp::new().await;

    let response = app.send(get_request("/api/v1/audit/logs", READER_KEY)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send(get_request("/api/v1/audit/logs?action=api_error", ADMIN_KEY))
        .await;
    let body = parse_response_body(response).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["actor"], "reader");
    assert_eq!(data[0]["details"]["operation"], "audit.list");
    assert_eq!(data[0]["details"]["code"], "forbidden");
}
