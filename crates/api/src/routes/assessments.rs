//! Assessment routes: request, poll, list and cancel.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::audited;
use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::{ApiKeyAuth, Permission};
use crate::middleware::metrics::record_assessment_requested;
use crate::services::assessment_processor::{
    EnqueueOutcome, ProcessorError, ProcessorMetrics, QueueStatus,
};
use domain::models::{
    Assessment, AssessmentRequest, AssessmentResult, AssessmentState, AssessmentStatistics,
    AssessmentStatus, AssessmentType,
};
use domain::services::{CancelOutcome, CircuitState, StoreError};
use shared::pagination::{PageInfo, PageRequest};

/// Assumed evaluation time before the processor has measured any.
const DEFAULT_PROCESSING_MS: f64 = 5000.0;

/// Headroom left under the request timeout when waiting for a result.
const RESPONSE_MARGIN_MS: u64 = 250;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRequested {
    pub assessment_id: Uuid,
    pub status: &'static str,
    /// Milliseconds until a result is expected.
    pub estimated_time: u64,
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    /// Milliseconds to wait for completion.
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListAssessmentsQuery {
    pub state: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentListItem {
    #[serde(flatten)]
    pub status: AssessmentStatus,
    pub assessment_type: AssessmentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
}

impl From<Assessment> for AssessmentListItem {
    fn from(assessment: Assessment) -> Self {
        Self {
            status: assessment.status(),
            assessment_type: assessment.request.assessment_type,
            overall_score: assessment.result.as_ref().map(|r| r.overall_score),
            server_name: assessment.request.server_name,
            source: assessment.request.source,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListAssessmentsResponse {
    pub data: Vec<AssessmentListItem>,
    pub pagination: PageInfo,
}

#[derive(Debug, Serialize)]
pub struct ProcessorStatusResponse {
    pub metrics: ProcessorMetrics,
    pub queue: QueueStatus,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelAssessmentRequest {
    #[validate(length(max = 500, message = "Reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAssessmentResponse {
    pub assessment_id: Uuid,
    pub state: AssessmentState,
    /// False when the assessment had already finished.
    pub cancelled: bool,
    pub message: String,
}

/// Milliseconds until an item at `position` (1-based) should finish.
fn estimate_completion_ms(position: usize, metrics: &ProcessorMetrics) -> u64 {
    let average = if metrics.average_processing_ms > 0.0 {
        metrics.average_processing_ms
    } else {
        DEFAULT_PROCESSING_MS
    };
    let waves = position.saturating_sub(1) / metrics.max_concurrent.max(1) + 1;
    (waves as f64 * average).round() as u64
}

/// Request a new assessment. It is queued immediately and evaluated in the
/// background.
pub async fn request_assessment(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Json(request): Json<AssessmentRequest>,
) -> Result<(StatusCode, Json<AssessmentRequested>), ApiError> {
    let result = async {
        auth.require(Permission::AssessmentWrite)?;
        let assessment_type = request.assessment_type;
        let assessment = state.store.create_assessment(request, auth.actor()).await?;
        record_assessment_requested(assessment_type.to_string());

        let position = match state.processor.process_assessment(assessment.id) {
            Ok(EnqueueOutcome::Queued { position }) => position,
            Ok(EnqueueOutcome::AlreadyQueued) => state.processor.queue_len(),
            // The record stays PENDING and the retry scan picks it up.
            Err(ProcessorError::QueueFull { capacity }) => {
                tracing::warn!(
                    assessment_id = %assessment.id,
                    capacity,
                    "Queue full, assessment left for the retry scan"
                );
                capacity + 1
            }
            Err(e) => return Err(e.into()),
        };

        Ok((
            StatusCode::ACCEPTED,
            Json(AssessmentRequested {
                assessment_id: assessment.id,
                status: "requested",
                estimated_time: estimate_completion_ms(position, &state.processor.metrics()),
            }),
        ))
    }
    .await;
    audited(&state, auth.actor(), "assessment.request", "", result).await
}

/// Wait up to `?timeout=` milliseconds for the assessment result.
pub async fn get_results(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(id): Path<Uuid>,
    Query(query): Query<ResultQuery>,
) -> Result<Json<AssessmentResult>, ApiError> {
    let result = async {
        auth.require(Permission::AssessmentRead)?;

        let ceiling_ms = (state.config.server.request_timeout_secs * 1000)
            .saturating_sub(RESPONSE_MARGIN_MS)
            .max(1);
        let wait_ms = query
            .timeout
            .unwrap_or(state.config.processor.default_result_wait_ms)
            .min(ceiling_ms);

        match state
            .store
            .wait_for_completion(id, Duration::from_millis(wait_ms))
            .await
        {
            Ok(result) => Ok(Json(result)),
            Err(StoreError::Timeout { .. })
                if state.processor.breaker().state() == CircuitState::Open =>
            {
                let snapshot = state.processor.breaker().snapshot();
                Err(ApiError::CircuitOpen {
                    retry_after_ms: snapshot.retry_after_ms.unwrap_or_default(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
    .await;
    audited(&state, auth.actor(), "assessment.results", id, result).await
}

pub async fn get_status(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<AssessmentStatus>, ApiError> {
    let result = async {
        auth.require(Permission::AssessmentRead)?;
        Ok(Json(state.store.get_state(id).await?))
    }
    .await;
    audited(&state, auth.actor(), "assessment.status", id, result).await
}

/// Newest first, optionally filtered by `?state=`.
pub async fn list_assessments(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Query(query): Query<ListAssessmentsQuery>,
) -> Result<Json<ListAssessmentsResponse>, ApiError> {
    let result = async {
        auth.require(Permission::AssessmentRead)?;
        let filter = query
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<AssessmentState>)
            .transpose()
            .map_err(ApiError::Validation)?;

        let page = PageRequest::new(query.limit, query.offset);
        let (assessments, total) = state.store.list_assessments(filter, page).await?;
        let pagination = PageInfo::new(page, assessments.len(), total);
        Ok(Json(ListAssessmentsResponse {
            data: assessments.into_iter().map(AssessmentListItem::from).collect(),
            pagination,
        }))
    }
    .await;
    audited(&state, auth.actor(), "assessment.list", "", result).await
}

pub async fn get_statistics(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<Json<AssessmentStatistics>, ApiError> {
    let result = async {
        auth.require(Permission::AssessmentRead)?;
        Ok(Json(state.store.get_statistics().await?))
    }
    .await;
    audited(&state, auth.actor(), "assessment.statistics", "", result).await
}

/// Processor counters plus a view of the queue.
pub async fn get_processor_status(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<Json<ProcessorStatusResponse>, ApiError> {
    let result = auth.require(Permission::AssessmentRead).map(|()| {
        Json(ProcessorStatusResponse {
            metrics: state.processor.metrics(),
            queue: state.processor.queue_status(),
        })
    });
    audited(&state, auth.actor(), "assessment.processor", "", result).await
}

/// Cancel an assessment. Cancelling one that already finished is a no-op.
pub async fn cancel_assessment(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelAssessmentRequest>>,
) -> Result<Json<CancelAssessmentResponse>, ApiError> {
    let result = async {
        auth.require(Permission::AssessmentWrite)?;
        let request = body.map(|Json(b)| b).unwrap_or_default();
        request.validate()?;
        let reason = request
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("requested by {}", auth.actor()));

        let response = match state
            .store
            .cancel_assessment(id, &reason, auth.actor())
            .await?
        {
            CancelOutcome::Cancelled(status) => {
                state.processor.cancel(id);
                CancelAssessmentResponse {
                    assessment_id: id,
                    state: status.state,
                    cancelled: true,
                    message: status.message,
                }
            }
            CancelOutcome::AlreadyTerminal(terminal) => CancelAssessmentResponse {
                assessment_id: id,
                state: terminal,
                cancelled: false,
                message: format!("Assessment already {}", terminal),
            },
        };
        Ok(Json(response))
    }
    .await;
    audited(&state, auth.actor(), "assessment.cancel", id, result).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::services::CircuitSnapshot;

    fn metrics(average_processing_ms: f64, max_concurrent: usize) -> ProcessorMetrics {
        ProcessorMetrics {
            processed: 0,
            succeeded: 0,
            failed: 0,
            retried: 0,
            deferred: 0,
            cancelled: 0,
            average_processing_ms,
            queue_size: 0,
            active_count: 0,
            max_concurrent,
            evaluator: "local",
            circuit_breaker: CircuitSnapshot {
                state: CircuitState::Closed,
                failure_count: 0,
                failure_threshold: 5,
                retry_after_ms: None,
            },
        }
    }

    #[test]
    fn test_estimate_uses_default_before_measurements() {
        assert_eq!(estimate_completion_ms(1, &metrics(0.0, 4)), 5000);
        assert_eq!(estimate_completion_ms(5, &metrics(0.0, 4)), 10_000);
    }

    #[test]
    fn test_estimate_scales_with_waves() {
        assert_eq!(estimate_completion_ms(4, &metrics(200.0, 4)), 200);
        assert_eq!(estimate_completion_ms(9, &metrics(200.0, 4)), 600);
        assert_eq!(estimate_completion_ms(3, &metrics(150.0, 1)), 450);
    }

    #[test]
    fn test_cancel_request_validation() {
        let request = CancelAssessmentRequest {
            reason: Some("x".repeat(501)),
        };
        assert!(request.validate().is_err());
        assert!(CancelAssessmentRequest::default().validate().is_ok());
    }
}
