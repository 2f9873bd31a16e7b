//! Remediation proposal and execution result entities.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database entity for remediation proposals.
#[derive(Debug, Clone, FromRow)]
pub struct RemediationProposalEntity {
    pub id: Uuid,
    pub approval_id: Uuid,
    pub assessment_id: Uuid,
    /// Proposed actions as a JSON array.
    pub actions: serde_json::Value,
    pub risk_assessment: serde_json::Value,
    pub estimated_time_secs: i64,
    pub status: String,
    pub requested_by: String,
    pub decided_by: Option<String>,
    pub decision_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Database entity for execution results.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionResultEntity {
    pub id: Uuid,
    pub action_id: Uuid,
    pub proposal_id: Option<Uuid>,
    pub action_type: String,
    pub server_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Ordered verification results as a JSON array.
    pub tests: serde_json::Value,
    pub rollback_required: bool,
    pub rollback_executed: bool,
    pub error_message: Option<String>,
    pub dry_run: bool,
}
