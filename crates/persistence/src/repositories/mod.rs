//! Postgres implementations of the domain repository traits.

pub mod assessment;
pub mod audit_log;
pub mod remediation;
pub mod system_metric;

pub use assessment::PgAssessmentRepository;
pub use audit_log::PgAuditLogRepository;
pub use remediation::PgRemediationRepository;
pub use system_metric::PgSystemMetricRepository;

use domain::repositories::RepositoryError;

pub(crate) fn storage_error(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::RowNotFound => RepositoryError::NotFound("row".to_string()),
        other => {
            tracing::error!(error = %other, "Database error");
            RepositoryError::Storage(other.to_string())
        }
    }
}
