//! HTTP route handlers.

pub mod assessments;
pub mod audit_logs;
pub mod health;
pub mod remediation;

use crate::app::AppState;
use crate::error::ApiError;
use domain::models::AuditAction;
use domain::services::AuditLogBuilder;

/// Records a failed operation in the audit trail, then hands the result back.
pub(crate) async fn audited<T>(
    state: &AppState,
    actor: &str,
    operation: &'static str,
    target: impl ToString,
    result: Result<T, ApiError>,
) -> Result<T, ApiError> {
    if let Err(err) = &result {
        state
            .audit
            .record_or_warn(
                AuditLogBuilder::actor_action(actor, AuditAction::ApiError)
                    .on_target(target)
                    .with_detail("operation", operation)
                    .with_detail("code", err.code())
                    .with_error(err.to_string()),
            )
            .await;
    }
    result
}
