use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::assessment_processor::ProcessorError;
use crate::services::execution_engine::ExecutionError;
use crate::services::remediation::RemediationError;
use domain::repositories::RepositoryError;
use domain::services::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Lost a compare-and-swap race; re-reading and retrying resolves it.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Already processing: {0}")]
    AlreadyProcessing(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Assessment failed: {0}")]
    Failed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Circuit open: retry in {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("Execution failure: {0}")]
    ExecutionFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    retryable: bool,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_)
            | ApiError::InvalidTransition(_)
            | ApiError::AlreadyProcessing(_)
            | ApiError::Cancelled(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Failed(_) | ApiError::ExecutionFailure(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::CircuitOpen { .. } | ApiError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::InvalidTransition(_) => "invalid_transition",
            ApiError::AlreadyProcessing(_) => "already_processing",
            ApiError::Validation(_) => "validation_error",
            ApiError::Timeout(_) => "timeout",
            ApiError::Failed(_) => "failed",
            ApiError::Cancelled(_) => "cancelled",
            ApiError::CircuitOpen { .. } => "circuit_open",
            ApiError::ExecutionFailure(_) => "execution_failure",
            ApiError::Internal(_) => "internal_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout(_)
                | ApiError::Conflict(_)
                | ApiError::CircuitOpen { .. }
                | ApiError::ServiceUnavailable(_)
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            ApiError::CircuitOpen { retry_after_ms } => format!(
                "Compliance evaluator is unavailable, retry in {}ms",
                retry_after_ms
            ),
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InvalidTransition(msg)
            | ApiError::AlreadyProcessing(msg)
            | ApiError::Validation(msg)
            | ApiError::Timeout(msg)
            | ApiError::Failed(msg)
            | ApiError::Cancelled(msg)
            | ApiError::ExecutionFailure(msg)
            | ApiError::ServiceUnavailable(msg) => msg.clone(),
        };

        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message,
                retryable: self.is_retryable(),
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            RepositoryError::VersionMismatch { id, .. } => {
                ApiError::Conflict(format!("{} was modified concurrently", id))
            }
            RepositoryError::Duplicate(what) => {
                ApiError::Conflict(format!("{} already exists", what))
            }
            RepositoryError::Storage(msg) => ApiError::Internal(format!("Storage error: {}", msg)),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(format!("Assessment {} not found", id)),
            StoreError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            StoreError::InvalidTransition { .. } => ApiError::InvalidTransition(err.to_string()),
            StoreError::Timeout { .. } => ApiError::Timeout(err.to_string()),
            StoreError::Failed { .. } => ApiError::Failed(err.to_string()),
            StoreError::Cancelled(_) => ApiError::Cancelled(err.to_string()),
            StoreError::Validation(msg) => ApiError::Validation(msg),
            StoreError::Repository(e) => e.into(),
        }
    }
}

impl From<ProcessorError> for ApiError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::AlreadyProcessing(_) => ApiError::AlreadyProcessing(err.to_string()),
            ProcessorError::QueueFull { .. } => ApiError::ServiceUnavailable(err.to_string()),
            ProcessorError::Store(e) => e.into(),
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::NotFound(id) => {
                ApiError::NotFound(format!("Execution {} not found", id))
            }
            ExecutionError::AlreadyExecuted(_) | ExecutionError::AlreadyRunning(_) => {
                ApiError::Conflict(err.to_string())
            }
            ExecutionError::Repository(e) => e.into(),
        }
    }
}

impl From<RemediationError> for ApiError {
    fn from(err: RemediationError) -> Self {
        match err {
            RemediationError::ApprovalNotFound(_) | RemediationError::ExecutionNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            RemediationError::AlreadyDecided { .. } => ApiError::InvalidTransition(err.to_string()),
            RemediationError::AssessmentNotCompleted { .. } => {
                ApiError::InvalidTransition(err.to_string())
            }
            RemediationError::Validation(msg) => ApiError::Validation(msg),
            RemediationError::Store(e) => e.into(),
            RemediationError::Execution(e) => e.into(),
            RemediationError::Repository(e) => e.into(),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| match &e.message {
                    Some(m) => format!("{}: {}", field, m),
                    None => format!("{}: invalid ({})", field, e.code),
                })
            })
            .collect();

        let message = match messages.len() {
            0 => errors.to_string(),
            1 => messages[0].clone(),
            _ => messages.join("; "),
        };

        ApiError::Validation(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::AssessmentState;
    use uuid::Uuid;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_envelope_shape() {
        let response = ApiError::Timeout("waited 100ms".into()).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "timeout");
        assert_eq!(body["error"]["message"], "waited 100ms");
        assert_eq!(body["error"]["retryable"], true);
    }

    #[tokio::test]
    async fn test_internal_message_is_hidden() {
        let response = ApiError::Internal("db password wrong".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "An internal error occurred");
        assert_eq!(body["error"]["retryable"], false);
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ApiError::Conflict("x".into()).is_retryable());
        assert!(ApiError::CircuitOpen { retry_after_ms: 10 }.is_retryable());
        assert!(ApiError::ServiceUnavailable("x".into()).is_retryable());
        assert!(!ApiError::Failed("x".into()).is_retryable());
        assert!(!ApiError::InvalidTransition("x".into()).is_retryable());
    }

    #[test]
    fn test_timeout_and_failed_are_distinct() {
        let id = Uuid::new_v4();
        let timeout: ApiError = StoreError::Timeout { id, waited_ms: 5 }.into();
        let failed: ApiError = StoreError::Failed {
            id,
            message: "boom".into(),
        }
        .into();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(failed.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_ne!(timeout.code(), failed.code());
    }

    #[test]
    fn test_store_error_mapping() {
        let id = Uuid::new_v4();
        let err: ApiError = StoreError::InvalidTransition {
            id,
            from: AssessmentState::Failed,
            to: AssessmentState::Cancelled,
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "invalid_transition");

        let err: ApiError = StoreError::NotFound(id).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError = StoreError::Repository(RepositoryError::Storage("x".into())).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_errors_mapping() {
        use validator::Validate;

        #[derive(Validate)]
        struct Body {
            #[validate(length(min = 1, message = "must not be empty"))]
            reason: String,
        }

        let errors = Body {
            reason: String::new(),
        }
        .validate()
        .unwrap_err();
        match ApiError::from(errors) {
            ApiError::Validation(msg) => assert_eq!(msg, "reason: must not be empty"),
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }
}
