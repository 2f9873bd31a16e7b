//! Remediation actions, proposals and approval decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::issue::{RuleCategory, Severity};

/// Kind of corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationActionType {
    InstallServer,
    UpdateServer,
    RemoveServer,
    SecurityFix,
    PerformanceFix,
}

impl RemediationActionType {
    /// Install and update leave a runnable server behind.
    pub fn expects_running_server(&self) -> bool {
        matches!(
            self,
            RemediationActionType::InstallServer | RemediationActionType::UpdateServer
        )
    }

    /// Rule category a fix action must clear.
    pub fn fixed_category(&self) -> Option<RuleCategory> {
        match self {
            RemediationActionType::SecurityFix => Some(RuleCategory::Security),
            RemediationActionType::PerformanceFix => Some(RuleCategory::Performance),
            _ => None,
        }
    }
}

impl std::fmt::Display for RemediationActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemediationActionType::InstallServer => write!(f, "install_server"),
            RemediationActionType::UpdateServer => write!(f, "update_server"),
            RemediationActionType::RemoveServer => write!(f, "remove_server"),
            RemediationActionType::SecurityFix => write!(f, "security_fix"),
            RemediationActionType::PerformanceFix => write!(f, "performance_fix"),
        }
    }
}

/// A single corrective operation. Immutable once proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RemediationAction {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub action_type: RemediationActionType,
    #[validate(custom(function = "shared::validation::validate_server_name"))]
    pub server_name: String,
    #[validate(custom(function = "shared::validation::validate_command"))]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_command: Option<String>,
    #[serde(default)]
    pub rollback_args: Vec<String>,
    #[serde(default)]
    pub rollback_env: BTreeMap<String, String>,
    /// Executables that must resolve before the action runs.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Environment variables that must be set and non-empty.
    #[serde(default)]
    pub required_env: Vec<String>,
    #[serde(default)]
    pub estimated_time_secs: u64,
}

/// Risk summary attached to a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub level: Severity,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub factors: Vec<String>,
}

impl Default for RiskAssessment {
    fn default() -> Self {
        Self {
            level: Severity::Medium,
            summary: String::new(),
            factors: Vec::new(),
        }
    }
}

/// Proposal lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    PendingApproval,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::PendingApproval => "pending_approval",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Executing => "executing",
            ProposalStatus::Completed => "completed",
            ProposalStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_approval" => Ok(ProposalStatus::PendingApproval),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            "executing" => Ok(ProposalStatus::Executing),
            "completed" => Ok(ProposalStatus::Completed),
            "failed" => Ok(ProposalStatus::Failed),
            _ => Err(format!("Unknown proposal status: {}", s)),
        }
    }
}

/// A set of actions waiting on, or past, a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationProposal {
    pub id: Uuid,
    pub approval_id: Uuid,
    pub assessment_id: Uuid,
    pub actions: Vec<RemediationAction>,
    pub risk_assessment: RiskAssessment,
    pub estimated_time_secs: u64,
    pub status: ProposalStatus,
    pub requested_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl RemediationProposal {
    pub fn new(request: ProposeRemediationRequest, requested_by: impl Into<String>) -> Self {
        let estimated = request
            .estimated_time
            .unwrap_or_else(|| request.actions.iter().map(|a| a.estimated_time_secs).sum());
        Self {
            id: Uuid::new_v4(),
            approval_id: Uuid::new_v4(),
            assessment_id: request.assessment_id,
            actions: request.actions,
            risk_assessment: request.risk_assessment,
            estimated_time_secs: estimated,
            status: ProposalStatus::PendingApproval,
            requested_by: requested_by.into(),
            decided_by: None,
            decision_reason: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }
}

/// Body of `POST /remediation/propose`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProposeRemediationRequest {
    pub assessment_id: Uuid,
    #[validate(length(min = 1, message = "At least one action is required"), nested)]
    pub actions: Vec<RemediationAction>,
    #[serde(default)]
    pub risk_assessment: RiskAssessment,
    #[serde(default)]
    pub estimated_time: Option<u64>,
}

/// A human decision on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// Body of `POST /remediation/approve`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRemediationRequest {
    pub approval_id: Uuid,
    pub decision: ApprovalDecision,
    #[serde(default)]
    #[validate(length(max = 1000, message = "Reason must be at most 1000 characters"))]
    pub reason: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}
