//! Assessment repository for database operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{Assessment, AssessmentState, AssessmentStatistics};
use domain::repositories::{AssessmentRepository, RepoResult, RepositoryError};
use shared::pagination::PageRequest;
use sqlx::PgPool;
use uuid::Uuid;

use super::storage_error;
use crate::entities::{AssessmentEntity, AssessmentStatisticsRow};
use crate::metrics::QueryTimer;

const COLUMNS: &str = "id, state, version, progress, message, request, result, error_message, \
                       retry_count, next_retry_at, created_at, updated_at, completed_at";

/// Postgres-backed assessment repository.
#[derive(Clone)]
pub struct PgAssessmentRepository {
    pool: PgPool,
}

impl PgAssessmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssessmentRepository for PgAssessmentRepository {
    async fn insert(&self, assessment: &Assessment) -> RepoResult<()> {
        let request = serde_json::to_value(&assessment.request)
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let timer = QueryTimer::new("insert_assessment");
        let result = sqlx::query(
            r#"
            INSERT INTO assessments (
                id, state, version, progress, message, request, result, error_message,
                retry_count, next_retry_at, created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NULL, NULL, $7, $8, $9, $10, NULL)
            "#,
        )
        .bind(assessment.id)
        .bind(assessment.state.as_str())
        .bind(assessment.version)
        .bind(assessment.progress as i16)
        .bind(&assessment.message)
        .bind(request)
        .bind(assessment.retry_count)
        .bind(assessment.next_retry_at)
        .bind(assessment.created_at)
        .bind(assessment.updated_at)
        .execute(&self.pool)
        .await;
        timer.finish(&result);

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(RepositoryError::Duplicate(assessment.id.to_string()))
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Assessment>> {
        let timer = QueryTimer::new("find_assessment_by_id");
        let entity = sqlx::query_as::<_, AssessmentEntity>(&format!(
            "SELECT {} FROM assessments WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error);
        timer.finish(&entity);

        entity?.map(entity_to_domain).transpose()
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &Assessment,
    ) -> RepoResult<Assessment> {
        let result = next
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        let timer = QueryTimer::new("compare_and_swap_assessment");
        let updated = sqlx::query_as::<_, AssessmentEntity>(&format!(
            r#"
            UPDATE assessments
            SET state = $3, version = version + 1, progress = $4, message = $5, result = $6,
                error_message = $7, retry_count = $8, next_retry_at = $9, updated_at = $10,
                completed_at = $11
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(next.id)
        .bind(expected_version)
        .bind(next.state.as_str())
        .bind(next.progress as i16)
        .bind(&next.message)
        .bind(result)
        .bind(&next.error_message)
        .bind(next.retry_count)
        .bind(next.next_retry_at)
        .bind(next.updated_at)
        .bind(next.completed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error);
        timer.finish(&updated);

        match updated? {
            Some(entity) => entity_to_domain(entity),
            None => {
                let exists: Option<i64> =
                    sqlx::query_scalar("SELECT version FROM assessments WHERE id = $1")
                        .bind(next.id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(storage_error)?;
                match exists {
                    Some(_) => Err(RepositoryError::VersionMismatch {
                        id: next.id,
                        expected: expected_version,
                    }),
                    None => Err(RepositoryError::NotFound(next.id.to_string())),
                }
            }
        }
    }

    async fn list(
        &self,
        state: Option<AssessmentState>,
        page: PageRequest,
    ) -> RepoResult<(Vec<Assessment>, i64)> {
        let state = state.map(|s| s.as_str());
        let timer = QueryTimer::new("list_assessments");
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM assessments WHERE ($1::text IS NULL OR state = $1)",
        )
        .bind(state)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        let entities = sqlx::query_as::<_, AssessmentEntity>(&format!(
            r#"
            SELECT {}
            FROM assessments
            WHERE ($1::text IS NULL OR state = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            COLUMNS
        ))
        .bind(state)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        timer.record();

        let assessments = entities
            .into_iter()
            .map(entity_to_domain)
            .collect::<RepoResult<Vec<_>>>()?;
        Ok((assessments, total))
    }

    async fn statistics(&self) -> RepoResult<AssessmentStatistics> {
        let timer = QueryTimer::new("assessment_statistics");
        let row = sqlx::query_as::<_, AssessmentStatisticsRow>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE state = 'PENDING') AS pending,
                COUNT(*) FILTER (WHERE state = 'PROCESSING') AS processing,
                COUNT(*) FILTER (WHERE state = 'COMPLETED') AS completed,
                COUNT(*) FILTER (WHERE state = 'FAILED') AS failed,
                COUNT(*) FILTER (WHERE state = 'CANCELLED') AS cancelled,
                COUNT(*) FILTER (WHERE state = 'FAILED' AND next_retry_at IS NOT NULL)
                    AS awaiting_retry,
                AVG((result->>'overallScore')::float8) AS average_score,
                AVG(EXTRACT(EPOCH FROM (completed_at - created_at))::float8)
                    FILTER (WHERE state = 'COMPLETED') AS average_completion_secs
            FROM assessments
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error);
        timer.finish(&row);

        let row = row?;
        Ok(AssessmentStatistics {
            total: row.total,
            pending: row.pending,
            processing: row.processing,
            completed: row.completed,
            failed: row.failed,
            cancelled: row.cancelled,
            awaiting_retry: row.awaiting_retry,
            average_score: row.average_score,
            average_completion_secs: row.average_completion_secs,
        })
    }

    async fn find_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<Assessment>> {
        let timer = QueryTimer::new("find_assessments_due_for_retry");
        let entities = sqlx::query_as::<_, AssessmentEntity>(&format!(
            r#"
            SELECT {}
            FROM assessments
            WHERE (state = 'FAILED' AND next_retry_at IS NOT NULL AND next_retry_at <= $1)
               OR (state = 'PENDING' AND (next_retry_at IS NULL OR next_retry_at <= $1))
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
            COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error);
        timer.finish(&entities);

        entities?.into_iter().map(entity_to_domain).collect()
    }

    async fn find_by_state(
        &self,
        state: AssessmentState,
        limit: i64,
    ) -> RepoResult<Vec<Assessment>> {
        let entities = sqlx::query_as::<_, AssessmentEntity>(&format!(
            "SELECT {} FROM assessments WHERE state = $1 ORDER BY created_at ASC LIMIT $2",
            COLUMNS
        ))
        .bind(state.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        entities.into_iter().map(entity_to_domain).collect()
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let timer = QueryTimer::new("delete_terminal_assessments");
        let result = sqlx::query(
            r#"
            DELETE FROM assessments
            WHERE state IN ('COMPLETED', 'CANCELLED') AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(storage_error);
        timer.finish(&result);

        Ok(result?.rows_affected())
    }

    async fn ping(&self) -> RepoResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(storage_error)
    }
}

/// Convert entity to domain model.
fn entity_to_domain(entity: AssessmentEntity) -> RepoResult<Assessment> {
    let state = entity
        .state
        .parse::<AssessmentState>()
        .map_err(RepositoryError::Storage)?;
    let request = serde_json::from_value(entity.request)
        .map_err(|e| RepositoryError::Storage(format!("assessment {} request: {}", entity.id, e)))?;
    let result = entity
        .result
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RepositoryError::Storage(format!("assessment {} result: {}", entity.id, e)))?;

    Ok(Assessment {
        id: entity.id,
        state,
        version: entity.version,
        progress: entity.progress.clamp(0, 100) as u8,
        message: entity.message,
        request,
        result,
        error_message: entity.error_message,
        retry_count: entity.retry_count,
        next_retry_at: entity.next_retry_at,
        created_at: entity.created_at,
        updated_at: entity.updated_at,
        completed_at: entity.completed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity() -> AssessmentEntity {
        let now = Utc::now();
        AssessmentEntity {
            id: Uuid::new_v4(),
            state: "COMPLETED".to_string(),
            version: 3,
            progress: 100,
            message: "done".to_string(),
            request: json!({"assessmentType": "security", "source": "cli"}),
            result: Some(json!({"overallScore": 62.0})),
            error_message: None,
            retry_count: 0,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        }
    }

    #[test]
    fn test_entity_to_domain() {
        let assessment = entity_to_domain(entity()).unwrap();
        assert_eq!(assessment.state, AssessmentState::Completed);
        assert_eq!(assessment.version, 3);
        assert_eq!(assessment.result.unwrap().overall_score, 62.0);
    }

    #[test]
    fn test_entity_with_unknown_state_is_storage_error() {
        let mut bad = entity();
        bad.state = "ARCHIVED".to_string();
        assert!(matches!(
            entity_to_domain(bad),
            Err(RepositoryError::Storage(_))
        ));
    }
}
