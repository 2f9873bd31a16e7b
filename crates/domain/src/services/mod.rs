//! Domain services for the compliance orchestrator.
//!
//! Services contain business logic that operates on domain models.

pub mod assessment_store;
pub mod audit;
pub mod circuit_breaker;
pub mod compliance_rules;
pub mod evaluator;
pub mod remediation_planner;
pub mod retry_policy;

pub use assessment_store::{
    AssessmentStore, AssessmentUpdate, CancelOutcome, StoreError, StoreResult, StoreSettings,
};
pub use audit::{AuditLogBuilder, AuditLogger};
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitOpen, CircuitSnapshot, CircuitState};
pub use compliance_rules::{ComplianceRule, RuleEngine, RuleOutcome, ServerEvaluation};
pub use evaluator::{ComplianceEvaluator, EvaluationError, LocalComplianceEvaluator};
pub use remediation_planner::{RemediationPlan, RemediationSuggestion};
pub use retry_policy::{RetryDecision, RetryPolicy};
