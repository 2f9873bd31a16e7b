//! Remediation proposal and execution result repository.

use async_trait::async_trait;
use domain::models::{
    ExecutionResult, ExecutionStatus, ProposalStatus, RemediationActionType, RemediationProposal,
};
use domain::repositories::{RemediationRepository, RepoResult, RepositoryError};
use sqlx::PgPool;
use uuid::Uuid;

use super::storage_error;
use crate::entities::{ExecutionResultEntity, RemediationProposalEntity};
use crate::metrics::QueryTimer;

const PROPOSAL_COLUMNS: &str = "id, approval_id, assessment_id, actions, risk_assessment, \
                                estimated_time_secs, status, requested_by, decided_by, \
                                decision_reason, created_at, decided_at";

const RESULT_COLUMNS: &str = "id, action_id, proposal_id, action_type, server_name, status, \
                              started_at, ended_at, tests, rollback_required, \
                              rollback_executed, error_message, dry_run";

/// Postgres-backed proposals and execution results.
#[derive(Clone)]
pub struct PgRemediationRepository {
    pool: PgPool,
}

impl PgRemediationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> RepoResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| RepositoryError::Storage(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> RepoResult<T> {
    serde_json::from_value(value).map_err(|e| RepositoryError::Storage(e.to_string()))
}

#[async_trait]
impl RemediationRepository for PgRemediationRepository {
    async fn insert_proposal(&self, proposal: &RemediationProposal) -> RepoResult<()> {
        let timer = QueryTimer::new("insert_remediation_proposal");
        let result = sqlx::query(
            r#"
            INSERT INTO remediation_proposals (
                id, approval_id, assessment_id, actions, risk_assessment, estimated_time_secs,
                status, requested_by, decided_by, decision_reason, created_at, decided_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(proposal.id)
        .bind(proposal.approval_id)
        .bind(proposal.assessment_id)
        .bind(to_json(&proposal.actions)?)
        .bind(to_json(&proposal.risk_assessment)?)
        .bind(proposal.estimated_time_secs as i64)
        .bind(proposal.status.as_str())
        .bind(&proposal.requested_by)
        .bind(&proposal.decided_by)
        .bind(&proposal.decision_reason)
        .bind(proposal.created_at)
        .bind(proposal.decided_at)
        .execute(&self.pool)
        .await;
        timer.finish(&result);

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(RepositoryError::Duplicate(proposal.id.to_string()))
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn find_proposal(&self, id: Uuid) -> RepoResult<Option<RemediationProposal>> {
        let entity = sqlx::query_as::<_, RemediationProposalEntity>(&format!(
            "SELECT {} FROM remediation_proposals WHERE id = $1",
            PROPOSAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        entity.map(proposal_to_domain).transpose()
    }

    async fn find_proposal_by_approval_id(
        &self,
        approval_id: Uuid,
    ) -> RepoResult<Option<RemediationProposal>> {
        let entity = sqlx::query_as::<_, RemediationProposalEntity>(&format!(
            "SELECT {} FROM remediation_proposals WHERE approval_id = $1",
            PROPOSAL_COLUMNS
        ))
        .bind(approval_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        entity.map(proposal_to_domain).transpose()
    }

    async fn update_proposal_status(
        &self,
        id: Uuid,
        from: ProposalStatus,
        to: ProposalStatus,
        decided_by: Option<&str>,
        reason: Option<&str>,
    ) -> RepoResult<bool> {
        let timer = QueryTimer::new("update_remediation_proposal_status");
        let result = sqlx::query(
            r#"
            UPDATE remediation_proposals
            SET status = $3,
                decided_by = COALESCE($4, decided_by),
                decision_reason = COALESCE($5, decision_reason),
                decided_at = CASE WHEN $4::text IS NULL THEN decided_at ELSE NOW() END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(decided_by)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(storage_error);
        timer.finish(&result);

        if result?.rows_affected() == 1 {
            return Ok(true);
        }
        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM remediation_proposals WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(id.to_string())),
        }
    }

    async fn insert_execution_result(&self, result: &ExecutionResult) -> RepoResult<()> {
        let timer = QueryTimer::new("insert_execution_result");
        let inserted = sqlx::query(
            r#"
            INSERT INTO execution_results (
                id, action_id, proposal_id, action_type, server_name, status, started_at,
                ended_at, tests, rollback_required, rollback_executed, error_message, dry_run
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(result.id)
        .bind(result.action_id)
        .bind(result.proposal_id)
        .bind(result.action_type.to_string())
        .bind(&result.server_name)
        .bind(result.status.as_str())
        .bind(result.started_at)
        .bind(result.ended_at)
        .bind(to_json(&result.tests)?)
        .bind(result.rollback_required)
        .bind(result.rollback_executed)
        .bind(&result.error_message)
        .bind(result.dry_run)
        .execute(&self.pool)
        .await;
        timer.finish(&inserted);

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(RepositoryError::Duplicate(result.action_id.to_string()))
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn find_execution_result(&self, id: Uuid) -> RepoResult<Option<ExecutionResult>> {
        let entity = sqlx::query_as::<_, ExecutionResultEntity>(&format!(
            "SELECT {} FROM execution_results WHERE id = $1",
            RESULT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        entity.map(result_to_domain).transpose()
    }

    async fn list_execution_results(&self, proposal_id: Uuid) -> RepoResult<Vec<ExecutionResult>> {
        let entities = sqlx::query_as::<_, ExecutionResultEntity>(&format!(
            "SELECT {} FROM execution_results WHERE proposal_id = $1 ORDER BY started_at ASC",
            RESULT_COLUMNS
        ))
        .bind(proposal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        entities.into_iter().map(result_to_domain).collect()
    }
}

fn proposal_to_domain(entity: RemediationProposalEntity) -> RepoResult<RemediationProposal> {
    Ok(RemediationProposal {
        id: entity.id,
        approval_id: entity.approval_id,
        assessment_id: entity.assessment_id,
        actions: from_json(entity.actions)?,
        risk_assessment: from_json(entity.risk_assessment)?,
        estimated_time_secs: entity.estimated_time_secs.max(0) as u64,
        status: entity
            .status
            .parse::<ProposalStatus>()
            .map_err(RepositoryError::Storage)?,
        requested_by: entity.requested_by,
        decided_by: entity.decided_by,
        decision_reason: entity.decision_reason,
        created_at: entity.created_at,
        decided_at: entity.decided_at,
    })
}

fn result_to_domain(entity: ExecutionResultEntity) -> RepoResult<ExecutionResult> {
    let action_type: RemediationActionType =
        from_json(serde_json::Value::String(entity.action_type))?;
    Ok(ExecutionResult {
        id: entity.id,
        action_id: entity.action_id,
        proposal_id: entity.proposal_id,
        action_type,
        server_name: entity.server_name,
        status: entity
            .status
            .parse::<ExecutionStatus>()
            .map_err(RepositoryError::Storage)?,
        started_at: entity.started_at,
        ended_at: entity.ended_at,
        tests: from_json(entity.tests)?,
        rollback_required: entity.rollback_required,
        rollback_executed: entity.rollback_executed,
        error_message: entity.error_message,
        dry_run: entity.dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_result_to_domain() {
        let now = Utc::now();
        let entity = ExecutionResultEntity {
            id: Uuid::new_v4(),
            action_id: Uuid::new_v4(),
            proposal_id: None,
            action_type: "security_fix".into(),
            server_name: "github".into(),
            status: "partial".into(),
            started_at: now,
            ended_at: now,
            tests: json!([{"name": "health_check", "passed": false, "message": "x", "durationMs": 3}]),
            rollback_required: true,
            rollback_executed: false,
            error_message: Some("verification failed".into()),
            dry_run: false,
        };
        let result = result_to_domain(entity).unwrap();
        assert_eq!(result.action_type, RemediationActionType::SecurityFix);
        assert_eq!(result.status, ExecutionStatus::Partial);
        assert_eq!(result.tests.len(), 1);
        assert!(!result.tests[0].passed);
    }

    #[test]
    fn test_proposal_with_bad_status_is_storage_error() {
        let now = Utc::now();
        let entity = RemediationProposalEntity {
            id: Uuid::new_v4(),
            approval_id: Uuid::new_v4(),
            assessment_id: Uuid::new_v4(),
            actions: json!([]),
            risk_assessment: json!({"level": "low"}),
            estimated_time_secs: 0,
            status: "archived".into(),
            requested_by: "ops".into(),
            decided_by: None,
            decision_reason: None,
            created_at: now,
            decided_at: None,
        };
        assert!(matches!(
            proposal_to_domain(entity),
            Err(RepositoryError::Storage(_))
        ));
    }
}
