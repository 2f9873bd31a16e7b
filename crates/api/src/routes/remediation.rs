//! Remediation routes: proposals, approval decisions and execution tracking.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use super::audited;
use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::{ApiKeyAuth, Permission};
use crate::services::remediation::{ApprovalOutcome, ProposalCreated};
use domain::models::{
    ActiveExecution, ApproveRemediationRequest, ExecutionLookup, ExecutionStats, ProposalStatus,
    ProposeRemediationRequest, RemediationProposal,
};
use domain::services::RemediationPlan;

#[derive(Debug, Serialize)]
pub struct ActiveExecutionsResponse {
    pub data: Vec<ActiveExecution>,
}

/// Record a proposal. Nothing runs until it is approved.
pub async fn propose(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Json(request): Json<ProposeRemediationRequest>,
) -> Result<(StatusCode, Json<ProposalCreated>), ApiError> {
    let target = request.assessment_id;
    let result = async {
        auth.require(Permission::RemediationPropose)?;
        let created = state.remediation.propose(request, auth.actor()).await?;
        Ok((StatusCode::CREATED, Json(created)))
    }
    .await;
    audited(&state, auth.actor(), "remediation.propose", target, result).await
}

/// Suggested actions for a completed assessment.
pub async fn suggestions(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(assessment_id): Path<Uuid>,
) -> Result<Json<RemediationPlan>, ApiError> {
    let result = async {
        auth.require(Permission::AssessmentRead)?;
        Ok(Json(state.remediation.suggestions(assessment_id).await?))
    }
    .await;
    audited(&state, auth.actor(), "remediation.suggestions", assessment_id, result).await
}

/// Approve or reject a proposal. An approval answers 202 while the actions
/// run in the background.
pub async fn approve(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Json(request): Json<ApproveRemediationRequest>,
) -> Result<(StatusCode, Json<ApprovalOutcome>), ApiError> {
    let target = request.approval_id;
    let result = async {
        auth.require(Permission::RemediationApprove)?;
        let outcome = state.remediation.approve(request, auth.actor()).await?;
        let status = if outcome.status == ProposalStatus::Executing {
            StatusCode::ACCEPTED
        } else {
            StatusCode::OK
        };
        Ok((status, Json(outcome)))
    }
    .await;
    audited(&state, auth.actor(), "remediation.approve", target, result).await
}

pub async fn get_proposal(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<RemediationProposal>, ApiError> {
    let result = async {
        auth.require(Permission::AssessmentRead)?;
        Ok(Json(state.remediation.get_proposal(id).await?))
    }
    .await;
    audited(&state, auth.actor(), "remediation.proposal", id, result).await
}

pub async fn list_active_executions(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<Json<ActiveExecutionsResponse>, ApiError> {
    let result = auth.require(Permission::AssessmentRead).map(|()| {
        Json(ActiveExecutionsResponse {
            data: state.remediation.engine().get_active_executions(),
        })
    });
    audited(&state, auth.actor(), "remediation.executions", "", result).await
}

/// A running execution, or the stored result once it has finished.
pub async fn get_execution(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionLookup>, ApiError> {
    let result = async {
        auth.require(Permission::AssessmentRead)?;
        Ok(Json(state.remediation.get_execution(id).await?))
    }
    .await;
    audited(&state, auth.actor(), "remediation.execution", id, result).await
}

pub async fn cancel_execution(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<ActiveExecution>, ApiError> {
    let result = async {
        auth.require(Permission::RemediationApprove)?;
        Ok(Json(state.remediation.cancel_execution(id, auth.actor()).await?))
    }
    .await;
    audited(&state, auth.actor(), "remediation.cancel", id, result).await
}

pub async fn get_stats(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<Json<ExecutionStats>, ApiError> {
    let result = auth
        .require(Permission::AssessmentRead)
        .map(|()| Json(state.remediation.engine().get_execution_stats()));
    audited(&state, auth.actor(), "remediation.stats", "", result).await
}
