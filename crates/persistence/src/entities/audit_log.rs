//! Audit log entity.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database entity for audit logs. Rows are never updated.
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogEntity {
    pub id: Uuid,

    /// Action performed, e.g. `assessment_completed`.
    pub action: String,

    /// API key name, operator, or `system`.
    pub actor: String,

    /// Identifier of the record acted on.
    pub target: String,

    /// `success` or `failure`.
    pub result: String,

    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
