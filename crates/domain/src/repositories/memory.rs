//! In-memory repository implementations for tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::pagination::PageRequest;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AssessmentRepository, AuditLogRepository, RemediationRepository, RepoResult,
    RepositoryError, SystemMetricRepository,
};
use crate::models::{
    Assessment, AssessmentState, AssessmentStatistics, AuditLogEntry, AuditLogQuery,
    ExecutionResult, NewAuditLogEntry, ProposalStatus, RemediationProposal, SystemMetric,
};

fn page<T: Clone>(items: &[T], page: PageRequest) -> Vec<T> {
    items
        .iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .cloned()
        .collect()
}

/// In-memory assessment repository.
#[derive(Default)]
pub struct InMemoryAssessmentRepository {
    records: RwLock<HashMap<Uuid, Assessment>>,
}

impl InMemoryAssessmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssessmentRepository for InMemoryAssessmentRepository {
    async fn insert(&self, assessment: &Assessment) -> RepoResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&assessment.id) {
            return Err(RepositoryError::Duplicate(assessment.id.to_string()));
        }
        records.insert(assessment.id, assessment.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Assessment>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &Assessment,
    ) -> RepoResult<Assessment> {
        let mut records = self.records.write().await;
        let current = records
            .get_mut(&next.id)
            .ok_or_else(|| RepositoryError::NotFound(next.id.to_string()))?;
        if current.version != expected_version {
            return Err(RepositoryError::VersionMismatch {
                id: next.id,
                expected: expected_version,
            });
        }
        let mut stored = next.clone();
        stored.version = expected_version + 1;
        *current = stored.clone();
        Ok(stored)
    }

    async fn list(
        &self,
        state: Option<AssessmentState>,
        page_request: PageRequest,
    ) -> RepoResult<(Vec<Assessment>, i64)> {
        let records = self.records.read().await;
        let mut matching: Vec<Assessment> = records
            .values()
            .filter(|a| state.map_or(true, |s| a.state == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as i64;
        Ok((page(&matching, page_request), total))
    }

    async fn statistics(&self) -> RepoResult<AssessmentStatistics> {
        let records = self.records.read().await;
        let mut stats = AssessmentStatistics::default();
        let mut scores = Vec::new();
        let mut durations = Vec::new();
        for a in records.values() {
            stats.total += 1;
            match a.state {
                AssessmentState::Pending => stats.pending += 1,
                AssessmentState::Processing => stats.processing += 1,
                AssessmentState::Completed => stats.completed += 1,
                AssessmentState::Failed => {
                    stats.failed += 1;
                    if a.next_retry_at.is_some() {
                        stats.awaiting_retry += 1;
                    }
                }
                AssessmentState::Cancelled => stats.cancelled += 1,
            }
            if let Some(result) = &a.result {
                scores.push(result.overall_score);
            }
            if let (AssessmentState::Completed, Some(done)) = (a.state, a.completed_at) {
                durations.push((done - a.created_at).num_milliseconds() as f64 / 1000.0);
            }
        }
        let mean = |v: &[f64]| (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64);
        stats.average_score = mean(&scores);
        stats.average_completion_secs = mean(&durations);
        Ok(stats)
    }

    async fn find_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<Assessment>> {
        let records = self.records.read().await;
        let mut due: Vec<Assessment> = records
            .values()
            .filter(|a| match a.state {
                AssessmentState::Failed => a.next_retry_at.map_or(false, |at| at <= now),
                AssessmentState::Pending => a.next_retry_at.map_or(true, |at| at <= now),
                _ => false,
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn find_by_state(
        &self,
        state: AssessmentState,
        limit: i64,
    ) -> RepoResult<Vec<Assessment>> {
        let records = self.records.read().await;
        let mut matching: Vec<Assessment> =
            records.values().filter(|a| a.state == state).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, a| !(a.state.is_terminal() && a.updated_at < cutoff));
        Ok((before - records.len()) as u64)
    }

    async fn ping(&self) -> RepoResult<()> {
        Ok(())
    }
}

/// In-memory audit log.
#[derive(Default)]
pub struct InMemoryAuditLogRepository {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in insertion order.
    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn append(&self, entry: NewAuditLogEntry) -> RepoResult<AuditLogEntry> {
        let entry = entry.into_entry();
        self.entries.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn list(
        &self,
        query: &AuditLogQuery,
        page_request: PageRequest,
    ) -> RepoResult<(Vec<AuditLogEntry>, i64)> {
        let entries = self.entries.read().await;
        let matching: Vec<AuditLogEntry> = entries
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        let total = matching.len() as i64;
        Ok((page(&matching, page_request), total))
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

/// In-memory proposals and execution results.
#[derive(Default)]
pub struct InMemoryRemediationRepository {
    proposals: RwLock<HashMap<Uuid, RemediationProposal>>,
    results: RwLock<Vec<ExecutionResult>>,
}

impl InMemoryRemediationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemediationRepository for InMemoryRemediationRepository {
    async fn insert_proposal(&self, proposal: &RemediationProposal) -> RepoResult<()> {
        let mut proposals = self.proposals.write().await;
        if proposals.contains_key(&proposal.id) {
            return Err(RepositoryError::Duplicate(proposal.id.to_string()));
        }
        proposals.insert(proposal.id, proposal.clone());
        Ok(())
    }

    async fn find_proposal(&self, id: Uuid) -> RepoResult<Option<RemediationProposal>> {
        Ok(self.proposals.read().await.get(&id).cloned())
    }

    async fn find_proposal_by_approval_id(
        &self,
        approval_id: Uuid,
    ) -> RepoResult<Option<RemediationProposal>> {
        Ok(self
            .proposals
            .read()
            .await
            .values()
            .find(|p| p.approval_id == approval_id)
            .cloned())
    }

    async fn update_proposal_status(
        &self,
        id: Uuid,
        from: ProposalStatus,
        to: ProposalStatus,
        decided_by: Option<&str>,
        reason: Option<&str>,
    ) -> RepoResult<bool> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if proposal.status != from {
            return Ok(false);
        }
        proposal.status = to;
        if let Some(decided_by) = decided_by {
            proposal.decided_by = Some(decided_by.to_string());
            proposal.decided_at = Some(Utc::now());
        }
        if let Some(reason) = reason {
            proposal.decision_reason = Some(reason.to_string());
        }
        Ok(true)
    }

    async fn insert_execution_result(&self, result: &ExecutionResult) -> RepoResult<()> {
        let mut results = self.results.write().await;
        if !result.dry_run
            && results
                .iter()
                .any(|r| r.action_id == result.action_id && !r.dry_run)
        {
            return Err(RepositoryError::Duplicate(result.action_id.to_string()));
        }
        results.push(result.clone());
        Ok(())
    }

    async fn find_execution_result(&self, id: Uuid) -> RepoResult<Option<ExecutionResult>> {
        Ok(self.results.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn list_execution_results(&self, proposal_id: Uuid) -> RepoResult<Vec<ExecutionResult>> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .filter(|r| r.proposal_id == Some(proposal_id))
            .cloned()
            .collect())
    }
}

/// In-memory metric snapshots.
#[derive(Default)]
pub struct InMemorySystemMetricRepository {
    metrics: RwLock<Vec<SystemMetric>>,
}

impl InMemorySystemMetricRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<SystemMetric> {
        self.metrics.read().await.clone()
    }
}

#[async_trait]
impl SystemMetricRepository for InMemorySystemMetricRepository {
    async fn record_batch(&self, metrics: &[SystemMetric]) -> RepoResult<()> {
        self.metrics.write().await.extend_from_slice(metrics);
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let mut metrics = self.metrics.write().await;
        let before = metrics.len();
        metrics.retain(|m| m.recorded_at >= cutoff);
        Ok((before - metrics.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssessmentOptions, AssessmentRequest, AssessmentType};

    fn assessment() -> Assessment {
        Assessment::new(AssessmentRequest {
            assessment_type: AssessmentType::Security,
            options: AssessmentOptions::default(),
            server_name: None,
            source: "test".into(),
        })
    }

    #[tokio::test]
    async fn test_compare_and_swap_increments_version() {
        let repo = InMemoryAssessmentRepository::new();
        let a = assessment();
        repo.insert(&a).await.unwrap();

        let mut next = a.clone();
        next.state = AssessmentState::Processing;
        let stored = repo.compare_and_swap(1, &next).await.unwrap();
        assert_eq!(stored.version, 2);

        let err = repo.compare_and_swap(1, &next).await.unwrap_err();
        assert!(matches!(err, RepositoryError::VersionMismatch { expected: 1, .. }));
    }

    #[tokio::test]
    async fn test_find_due_for_retry() {
        let repo = InMemoryAssessmentRepository::new();
        let now = Utc::now();

        let pending = assessment();
        repo.insert(&pending).await.unwrap();

        let mut due = assessment();
        due.state = AssessmentState::Failed;
        due.next_retry_at = Some(now - chrono::Duration::seconds(1));
        repo.insert(&due).await.unwrap();

        let mut later = assessment();
        later.state = AssessmentState::Failed;
        later.next_retry_at = Some(now + chrono::Duration::minutes(5));
        repo.insert(&later).await.unwrap();

        let mut permanent = assessment();
        permanent.state = AssessmentState::Failed;
        repo.insert(&permanent).await.unwrap();

        let ids: Vec<Uuid> = repo
            .find_due_for_retry(now, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&pending.id));
        assert!(ids.contains(&due.id));
    }

    #[tokio::test]
    async fn test_delete_terminal_only() {
        let repo = InMemoryAssessmentRepository::new();
        let mut done = assessment();
        done.state = AssessmentState::Completed;
        repo.insert(&done).await.unwrap();
        repo.insert(&assessment()).await.unwrap();

        let removed = repo
            .delete_terminal_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.statistics().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_duplicate_execution_result_rejected() {
        let repo = InMemoryRemediationRepository::new();
        let now = Utc::now();
        let result = ExecutionResult {
            id: Uuid::new_v4(),
            action_id: Uuid::new_v4(),
            proposal_id: None,
            action_type: crate::models::RemediationActionType::RemoveServer,
            server_name: "old".into(),
            status: crate::models::ExecutionStatus::Success,
            started_at: now,
            ended_at: now,
            tests: vec![],
            rollback_required: false,
            rollback_executed: false,
            error_message: None,
            dry_run: false,
        };
        repo.insert_execution_result(&result).await.unwrap();
        let again = ExecutionResult {
            id: Uuid::new_v4(),
            ..result
        };
        assert!(matches!(
            repo.insert_execution_result(&again).await,
            Err(RepositoryError::Duplicate(_))
        ));
    }
}
