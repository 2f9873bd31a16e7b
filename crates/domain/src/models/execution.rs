//! Execution results and options for remediation actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::remediation::RemediationActionType;

/// Final status of one executed action.
///
/// `Partial` means the command applied but verification failed and no rollback
/// succeeded. `Pending` is reported for dry runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Partial,
    Pending,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Pending => "pending",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "partial" => Ok(ExecutionStatus::Partial),
            "pending" => Ok(ExecutionStatus::Pending),
            _ => Err(format!("Unknown execution status: {}", s)),
        }
    }
}

/// Outcome of one verification step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            duration_ms,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            duration_ms,
        }
    }
}

/// Record of one executed action. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub id: Uuid,
    pub action_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<Uuid>,
    pub action_type: RemediationActionType,
    pub server_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub tests: Vec<TestResult>,
    pub rollback_required: bool,
    pub rollback_executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub dry_run: bool,
}

impl ExecutionResult {
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0)
    }

    pub fn all_tests_passed(&self) -> bool {
        self.tests.iter().all(|t| t.passed)
    }
}

fn default_true() -> bool {
    true
}

/// Options controlling how actions execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub parallel: bool,
    /// Upper bound on concurrently running actions when `parallel` is set.
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Per-command timeout override.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            rollback_on_failure: true,
            dry_run: false,
            parallel: false,
            max_parallel: None,
            timeout_secs: None,
        }
    }
}

/// Phase an in-flight execution is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Validating,
    BackingUp,
    Executing,
    Verifying,
    RollingBack,
}

/// Snapshot of an in-flight execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveExecution {
    pub execution_id: Uuid,
    pub action_id: Uuid,
    pub server_name: String,
    pub action_type: RemediationActionType,
    pub phase: ExecutionPhase,
    pub started_at: DateTime<Utc>,
}

/// Lookup result for `get_execution_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionLookup {
    Running(ActiveExecution),
    Finished(ExecutionResult),
}

/// Aggregate execution counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub partial: u64,
    pub dry_runs: u64,
    pub rollbacks_executed: u64,
    pub cancelled: u64,
    pub active: usize,
    pub average_duration_ms: f64,
}

impl ExecutionStats {
    /// Fold one finished result into the counters.
    pub fn record(&mut self, result: &ExecutionResult) {
        let previous_total = self.total as f64;
        self.total += 1;
        match result.status {
            ExecutionStatus::Success => self.succeeded += 1,
            ExecutionStatus::Failed => self.failed += 1,
            ExecutionStatus::Partial => self.partial += 1,
            ExecutionStatus::Pending => self.dry_runs += 1,
        }
        if result.rollback_executed {
            self.rollbacks_executed += 1;
        }
        self.average_duration_ms = (self.average_duration_ms * previous_total
            + result.duration_ms() as f64)
            / self.total as f64;
    }
}
