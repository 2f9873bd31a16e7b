//! Application services: assessment processing, remediation and the outbound
//! compliance evaluator client.

pub mod assessment_processor;
pub mod compliance_client;
pub mod execution_engine;
pub mod remediation;

pub use assessment_processor::{AssessmentProcessor, ProcessorError, ProcessorSettings};
pub use compliance_client::RemoteComplianceEvaluator;
pub use execution_engine::{EngineSettings, ExecutionContext, ExecutionEngine, ExecutionError};
pub use remediation::{RemediationError, RemediationService};
