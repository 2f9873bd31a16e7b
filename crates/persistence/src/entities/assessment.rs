//! Assessment entity.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database entity for assessments.
#[derive(Debug, Clone, FromRow)]
pub struct AssessmentEntity {
    pub id: Uuid,

    /// PENDING, PROCESSING, COMPLETED, FAILED or CANCELLED.
    pub state: String,

    /// Compare-and-swap version, starts at 1.
    pub version: i64,

    pub progress: i16,
    pub message: String,

    /// Original request as JSON. Never updated.
    pub request: serde_json::Value,

    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate row for assessment statistics.
#[derive(Debug, Clone, FromRow)]
pub struct AssessmentStatisticsRow {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub awaiting_retry: i64,
    pub average_score: Option<f64>,
    pub average_completion_secs: Option<f64>,
}
