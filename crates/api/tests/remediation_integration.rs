//! Integration tests for the remediation workflow endpoints.
//!
//! Actions run real shell commands against a temporary configuration file.

#![cfg(unix)]

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{
    delete_request, eventually, get_request, json_request, parse_response_body, TestApp,
    ADMIN_KEY, READER_KEY,
};
use domain::models::AuditAction;
use serde_json::{json, Value};
use uuid::Uuid;

/// Action that rewrites the managed file without `server`.
fn remove_action(config_path: &std::path::Path, server: &str) -> Value {
    json!({
        "actionType": "remove_server",
        "serverName": server,
        "command": "sh",
        "args": ["-c", format!("printf '{{\"mcpServers\": {{}}}}' > '{}'", config_path.display())],
        "estimatedTimeSecs": 1
    })
}

async fn propose(app: &TestApp, assessment_id: Uuid, actions: Vec<Value>) -> Value {
    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/remediation/propose",
            json!({
                "assessmentId": assessment_id,
                "actions": actions,
                "riskAssessment": {"level": "medium", "summary": "test change"}
            }),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    parse_response_body(response).await
}

async fn proposal_status(app: &TestApp, proposal_id: &str) -> String {
    let response = app
        .send(get_request(
            &format!("/api/v1/remediation/proposals/{}", proposal_id),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    parse_response_body(response).await["status"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_propose_approve_execute() {
    let app = TestApp::new().await;
    let assessment_id = app.completed_assessment().await;

    let created = propose(&app, assessment_id, vec![remove_action(&app.config_path, "github")]).await;
    assert_eq!(created["status"], "pending_approval");
    let proposal_id = created["proposalId"].as_str().unwrap().to_string();
    let approval_id = created["approvalId"].as_str().unwrap().to_string();

    // Nothing runs before approval.
    let document: Value =
        serde_json::from_slice(&std::fs::read(&app.config_path).unwrap()).unwrap();
    assert!(document["mcpServers"]["github"].is_object());

    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/remediation/approve",
            json!({"approvalId": approval_id, "decision": "approved", "reason": "ticket 42"}),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "executing");

    let finished = eventually(Duration::from_secs(5), || {
        let app = &app;
        let proposal_id = proposal_id.clone();
        async move { proposal_status(app, &proposal_id).await == "completed" }
    })
    .await;
    assert!(finished, "proposal never completed");

    let document: Value =
        serde_json::from_slice(&std::fs::read(&app.config_path).unwrap()).unwrap();
    assert!(document["mcpServers"]["github"].is_null());

    let executed = app.audit_entries(AuditAction::RemediationExecuted).await;
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].actor, "admin");
    assert_eq!(app.audit_entries(AuditAction::RemediationApproved).await.len(), 1);

    let response = app.send(get_request("/api/v1/remediation/stats", READER_KEY)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = parse_response_body(response).await;
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["succeeded"], 1);
}

#[tokio::test]
async fn test_failed_verification_restores_configuration() {
    let app = TestApp::new().await;
    let assessment_id = app.completed_assessment().await;
    let original = std::fs::read(&app.config_path).unwrap();

    // Claims to install `slack` but corrupts the file instead.
    let action = json!({
        "actionType": "install_server",
        "serverName": "slack",
        "command": "sh",
        "args": ["-c", format!("printf 'not json' > '{}'", app.config_path.display())]
    });
    let created = propose(&app, assessment_id, vec![action]).await;
    let proposal_id = created["proposalId"].as_str().unwrap().to_string();

    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/remediation/approve",
            json!({"approvalId": created["approvalId"], "decision": "approved"}),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let finished = eventually(Duration::from_secs(5), || {
        let app = &app;
        let proposal_id = proposal_id.clone();
        async move { proposal_status(app, &proposal_id).await == "failed" }
    })
    .await;
    assert!(finished, "proposal never failed");

    assert_eq!(std::fs::read(&app.config_path).unwrap(), original);
    assert_eq!(app.audit_entries(AuditAction::RemediationRolledBack).await.len(), 1);
}

#[tokio::test]
async fn test_reject_and_double_decision() {
    let app = TestApp::new().await;
    let assessment_id = app.completed_assessment().await;
    let created = propose(&app, assessment_id, vec![remove_action(&app.config_path, "github")]).await;
    let approval_id = created["approvalId"].clone();

    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/remediation/approve",
            json!({"approvalId": approval_id, "decision": "rejected", "reason": "not now"}),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(parse_response_body(response).await["status"], "rejected");

    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/remediation/approve",
            json!({"approvalId": approval_id, "decision": "approved"}),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_transition");

    // The file was never touched.
    let document: Value =
        serde_json::from_slice(&std::fs::read(&app.config_path).unwrap()).unwrap();
    assert!(document["mcpServers"]["github"].is_object());
    assert!(app.audit_entries(AuditAction::RemediationExecuted).await.is_empty());
}

#[tokio::test]
async fn test_dry_run_leaves_proposal_pending() {
    let app = TestApp::new().await;
    let assessment_id = app.completed_assessment().await;
    let created = propose(&app, assessment_id, vec![remove_action(&app.config_path, "github")]).await;
    let proposal_id = created["proposalId"].as_str().unwrap().to_string();

    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/remediation/approve",
            json!({"approvalId": created["approvalId"], "decision": "approved", "dryRun": true}),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["dryRun"], true);
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["results"][0]["dryRun"], true);

    assert_eq!(proposal_status(&app, &proposal_id).await, "pending_approval");
    let document: Value =
        serde_json::from_slice(&std::fs::read(&app.config_path).unwrap()).unwrap();
    assert!(document["mcpServers"]["github"].is_object());
}

#[tokio::test]
async fn test_permissions_and_unknown_ids() {
    let app = TestApp::new().await;
    let assessment_id = app.completed_assessment().await;

    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/remediation/propose",
            json!({"assessmentId": assessment_id, "actions": [remove_action(&app.config_path, "github")]}),
            READER_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/remediation/approve",
            json!({"approvalId": Uuid::new_v4(), "decision": "approved"}),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .send(get_request(
            &format!("/api/v1/remediation/executions/{}", Uuid::new_v4()),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .send(delete_request(
            &format!("/api/v1/remediation/executions/{}", Uuid::new_v4()),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .send(get_request("/api/v1/remediation/executions", READER_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(parse_response_body(response).await["data"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_suggestions_require_completed_assessment() {
    let app = TestApp::with_document(json!({
        "mcpServers": {
            "api": {"command": "node", "env": {"API_KEY": "sk-live-plaintext-secret-value"}}
        }
    }))
    .await;
    let assessment_id = app.completed_assessment().await;

    let response = app
        .send(get_request(
            &format!("/api/v1/remediation/suggestions/{}", assessment_id),
            READER_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let plan = parse_response_body(response).await;
    let suggestions = plan["suggestions"].as_array().unwrap();
    assert!(suggestions
        .iter()
        .any(|s| s["serverName"] == "api" && s["actionType"] == "security_fix"));

    let response = app
        .send(get_request(
            &format!("/api/v1/remediation/suggestions/{}", Uuid::new_v4()),
            READER_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_propose_rejects_unfinished_assessment() {
    let app = TestApp::new().await;
    let request = serde_json::from_value(json!({"assessmentType": "full", "source": "test"})).unwrap();
    let assessment = app.state.store.create_assessment(request, "ops").await.unwrap();
    app.state
        .store
        .cancel_assessment(assessment.id, "superseded", "ops")
        .await
        .unwrap();

    let response = app
        .send(json_request(
            Method::POST,
            "/api/v1/remediation/propose",
            json!({
                "assessmentId": assessment.id,
                "actions": [remove_action(&app.config_path, "github")],
                "riskAssessment": {"level": "low", "summary": "test change"}
            }),
            ADMIN_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
