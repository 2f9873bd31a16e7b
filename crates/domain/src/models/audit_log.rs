//! Audit log domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

/// Actor recorded for work the orchestrator does on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Assessment lifecycle
    AssessmentRequested,
    AssessmentStarted,
    AssessmentCompleted,
    AssessmentFailed,
    AssessmentRetryScheduled,
    AssessmentCancelled,
    AssessmentRecovered,

    // Remediation lifecycle
    RemediationProposed,
    RemediationApproved,
    RemediationRejected,
    RemediationExecuted,
    RemediationRolledBack,
    RemediationCancelled,

    // Controllers
    ApiError,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AssessmentRequested => "assessment_requested",
            AuditAction::AssessmentStarted => "assessment_started",
            AuditAction::AssessmentCompleted => "assessment_completed",
            AuditAction::AssessmentFailed => "assessment_failed",
            AuditAction::AssessmentRetryScheduled => "assessment_retry_scheduled",
            AuditAction::AssessmentCancelled => "assessment_cancelled",
            AuditAction::AssessmentRecovered => "assessment_recovered",
            AuditAction::RemediationProposed => "remediation_proposed",
            AuditAction::RemediationApproved => "remediation_approved",
            AuditAction::RemediationRejected => "remediation_rejected",
            AuditAction::RemediationExecuted => "remediation_executed",
            AuditAction::RemediationRolledBack => "remediation_rolled_back",
            AuditAction::RemediationCancelled => "remediation_cancelled",
            AuditAction::ApiError => "api_error",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assessment_requested" => Ok(AuditAction::AssessmentRequested),
            "assessment_started" => Ok(AuditAction::AssessmentStarted),
            "assessment_completed" => Ok(AuditAction::AssessmentCompleted),
            "assessment_failed" => Ok(AuditAction::AssessmentFailed),
            "assessment_retry_scheduled" => Ok(AuditAction::AssessmentRetryScheduled),
            "assessment_cancelled" => Ok(AuditAction::AssessmentCancelled),
            "assessment_recovered" => Ok(AuditAction::AssessmentRecovered),
            "remediation_proposed" => Ok(AuditAction::RemediationProposed),
            "remediation_approved" => Ok(AuditAction::RemediationApproved),
            "remediation_rejected" => Ok(AuditAction::RemediationRejected),
            "remediation_executed" => Ok(AuditAction::RemediationExecuted),
            "remediation_rolled_back" => Ok(AuditAction::RemediationRolledBack),
            "remediation_cancelled" => Ok(AuditAction::RemediationCancelled),
            "api_error" => Ok(AuditAction::ApiError),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded with an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
}

impl std::fmt::Display for AuditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditResult::Success => write!(f, "success"),
            AuditResult::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for AuditResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(AuditResult::Success),
            "failure" => Ok(AuditResult::Failure),
            _ => Err(format!("Unknown audit result: {}", s)),
        }
    }
}

/// Persisted audit log entry. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub actor: String,
    pub target: String,
    pub result: AuditResult,
    pub details: JsonValue,
    pub timestamp: DateTime<Utc>,
}

/// Input for appending a new audit entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditLogEntry {
    pub action: AuditAction,
    pub actor: String,
    pub target: String,
    pub result: AuditResult,
    pub details: JsonValue,
}

impl NewAuditLogEntry {
    pub fn into_entry(self) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::new_v4(),
            action: self.action,
            actor: self.actor,
            target: self.target,
            result: self.result,
            details: self.details,
            timestamp: Utc::now(),
        }
    }
}

/// Filters for listing audit logs.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    pub action: Option<AuditAction>,
    pub actor: Option<String>,
    pub target: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl AuditLogQuery {
    /// Whether `entry` passes every filter set on this query.
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.action.map_or(true, |a| entry.action == a)
            && self.actor.as_ref().map_or(true, |a| &entry.actor == a)
            && self.target.as_ref().map_or(true, |t| &entry.target == t)
            && self.from.map_or(true, |from| entry.timestamp >= from)
            && self.to.map_or(true, |to| entry.timestamp <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_action_round_trips_through_str() {
        for action in [
            AuditAction::AssessmentCompleted,
            AuditAction::AssessmentCancelled,
            AuditAction::RemediationRolledBack,
            AuditAction::ApiError,
        ] {
            assert_eq!(AuditAction::from_str(action.as_str()).unwrap(), action);
        }
        assert!(AuditAction::from_str("device.assign").is_err());
    }

    #[test]
    fn test_audit_action_serializes_snake_case() {
        let json = serde_json::to_string(&AuditAction::AssessmentRetryScheduled).unwrap();
        assert_eq!(json, "\"assessment_retry_scheduled\"");
    }

    #[test]
    fn test_query_matches() {
        let entry = NewAuditLogEntry {
            action: AuditAction::AssessmentCompleted,
            actor: SYSTEM_ACTOR.to_string(),
            target: "a-1".to_string(),
            result: AuditResult::Success,
            details: serde_json::json!({}),
        }
        .into_entry();

        let mut query = AuditLogQuery::default();
        assert!(query.matches(&entry));

        query.action = Some(AuditAction::AssessmentCompleted);
        query.actor = Some("system".to_string());
        assert!(query.matches(&entry));

        query.target = Some("a-2".to_string());
        assert!(!query.matches(&entry));
    }
}
