//! Domain models for the compliance orchestrator.

pub mod assessment;
pub mod audit_log;
pub mod execution;
pub mod issue;
pub mod remediation;
pub mod server_config;
pub mod system_metric;

pub use assessment::{
    Assessment, AssessmentOptions, AssessmentRequest, AssessmentResult, AssessmentState,
    AssessmentStatistics, AssessmentStatus, AssessmentType, ServerComplianceStatus,
};
pub use audit_log::{
    AuditAction, AuditLogEntry, AuditLogQuery, AuditResult, NewAuditLogEntry, SYSTEM_ACTOR,
};
pub use execution::{
    ActiveExecution, ExecutionLookup, ExecutionOptions, ExecutionPhase, ExecutionResult,
    ExecutionStats, ExecutionStatus, TestResult,
};
pub use issue::{AutoFix, ConfigurationIssue, IssueCounts, IssueType, RuleCategory, Severity};
pub use remediation::{
    ApprovalDecision, ApproveRemediationRequest, ProposalStatus, ProposeRemediationRequest,
    RemediationAction, RemediationActionType, RemediationProposal, RiskAssessment,
};
pub use server_config::{ServerConfig, Transport};
pub use system_metric::SystemMetric;
