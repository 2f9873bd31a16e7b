//! Persistence abstractions used by the domain services.
//!
//! Postgres implementations live in the `persistence` crate; [`memory`]
//! provides in-process implementations for tests and local development.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::pagination::PageRequest;
use uuid::Uuid;

use crate::models::{
    Assessment, AssessmentState, AssessmentStatistics, AuditLogEntry, AuditLogQuery,
    ExecutionResult, NewAuditLogEntry, ProposalStatus, RemediationProposal, SystemMetric,
};

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Errors raised by repository implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// Compare-and-swap lost: the persisted version is no longer `expected`.
    #[error("version mismatch for {id}: expected {expected}")]
    VersionMismatch { id: Uuid, expected: i64 },

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Versioned assessment records.
#[async_trait]
pub trait AssessmentRepository: Send + Sync {
    async fn insert(&self, assessment: &Assessment) -> RepoResult<()>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Assessment>>;

    /// Persist `next` only if the stored version equals `expected_version`.
    /// The stored record gets version `expected_version + 1`, which is returned.
    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &Assessment,
    ) -> RepoResult<Assessment>;

    /// Newest first, optionally filtered by state. Returns the page and the total.
    async fn list(
        &self,
        state: Option<AssessmentState>,
        page: PageRequest,
    ) -> RepoResult<(Vec<Assessment>, i64)>;

    async fn statistics(&self) -> RepoResult<AssessmentStatistics>;

    /// FAILED records whose retry time has elapsed, plus PENDING records that
    /// were never picked up. Oldest first.
    async fn find_due_for_retry(&self, now: DateTime<Utc>, limit: i64)
        -> RepoResult<Vec<Assessment>>;

    /// Records in `state`, oldest first.
    async fn find_by_state(&self, state: AssessmentState, limit: i64)
        -> RepoResult<Vec<Assessment>>;

    /// Delete terminal records last updated before `cutoff`.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64>;

    async fn ping(&self) -> RepoResult<()>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: NewAuditLogEntry) -> RepoResult<AuditLogEntry>;

    /// Newest first.
    async fn list(
        &self,
        query: &AuditLogQuery,
        page: PageRequest,
    ) -> RepoResult<(Vec<AuditLogEntry>, i64)>;

    /// Retention only.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64>;
}

/// Remediation proposals and their execution results.
#[async_trait]
pub trait RemediationRepository: Send + Sync {
    async fn insert_proposal(&self, proposal: &RemediationProposal) -> RepoResult<()>;

    async fn find_proposal(&self, id: Uuid) -> RepoResult<Option<RemediationProposal>>;

    async fn find_proposal_by_approval_id(
        &self,
        approval_id: Uuid,
    ) -> RepoResult<Option<RemediationProposal>>;

    /// Move a proposal from `from` to `to`. Returns false when the stored status
    /// was not `from`.
    async fn update_proposal_status(
        &self,
        id: Uuid,
        from: ProposalStatus,
        to: ProposalStatus,
        decided_by: Option<&str>,
        reason: Option<&str>,
    ) -> RepoResult<bool>;

    /// Fails with `Duplicate` when a non-dry-run result already exists for the action.
    async fn insert_execution_result(&self, result: &ExecutionResult) -> RepoResult<()>;

    async fn find_execution_result(&self, id: Uuid) -> RepoResult<Option<ExecutionResult>>;

    async fn list_execution_results(&self, proposal_id: Uuid) -> RepoResult<Vec<ExecutionResult>>;
}

/// Periodic metric snapshots.
#[async_trait]
pub trait SystemMetricRepository: Send + Sync {
    async fn record_batch(&self, metrics: &[SystemMetric]) -> RepoResult<()>;

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64>;
}
