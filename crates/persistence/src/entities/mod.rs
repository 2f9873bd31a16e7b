//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod assessment;
pub mod audit_log;
pub mod remediation;

pub use assessment::{AssessmentEntity, AssessmentStatisticsRow};
pub use audit_log::AuditLogEntity;
pub use remediation::{ExecutionResultEntity, RemediationProposalEntity};
