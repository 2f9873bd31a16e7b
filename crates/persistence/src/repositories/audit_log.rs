//! Audit log repository for database operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{AuditAction, AuditLogEntry, AuditLogQuery, AuditResult, NewAuditLogEntry};
use domain::repositories::{AuditLogRepository, RepoResult, RepositoryError};
use shared::pagination::PageRequest;
use sqlx::PgPool;

use super::storage_error;
use crate::entities::AuditLogEntity;
use crate::metrics::QueryTimer;

/// Helper struct for building dynamic WHERE clauses from audit log filters.
struct AuditLogFilterBuilder {
    conditions: Vec<String>,
    param_count: i32,
}

impl AuditLogFilterBuilder {
    fn build(query: &AuditLogQuery) -> Self {
        let mut conditions = vec!["TRUE".to_string()];
        let mut param_count = 0;

        if query.action.is_some() {
            param_count += 1;
            conditions.push(format!("action = ${}", param_count));
        }
        if query.actor.is_some() {
            param_count += 1;
            conditions.push(format!("actor = ${}", param_count));
        }
        if query.target.is_some() {
            param_count += 1;
            conditions.push(format!("target = ${}", param_count));
        }
        if query.from.is_some() {
            param_count += 1;
            conditions.push(format!("timestamp >= ${}", param_count));
        }
        if query.to.is_some() {
            param_count += 1;
            conditions.push(format!("timestamp <= ${}", param_count));
        }

        Self {
            conditions,
            param_count,
        }
    }

    fn where_clause(&self) -> String {
        self.conditions.join(" AND ")
    }
}

/// Binds the optional filters in the same order `AuditLogFilterBuilder` numbers them.
macro_rules! bind_query_filters {
    ($builder:expr, $query:expr) => {{
        let mut b = $builder;
        if let Some(action) = $query.action {
            b = b.bind(action.as_str());
        }
        if let Some(ref actor) = $query.actor {
            b = b.bind(actor);
        }
        if let Some(ref target) = $query.target {
            b = b.bind(target);
        }
        if let Some(ref from) = $query.from {
            b = b.bind(from);
        }
        if let Some(ref to) = $query.to {
            b = b.bind(to);
        }
        b
    }};
}

/// Postgres-backed, append-only audit log.
#[derive(Clone)]
pub struct PgAuditLogRepository {
    pool: PgPool,
}

impl PgAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PgAuditLogRepository {
    async fn append(&self, entry: NewAuditLogEntry) -> RepoResult<AuditLogEntry> {
        let entry = entry.into_entry();
        let timer = QueryTimer::new("insert_audit_log");
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (id, action, actor, target, result, details, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.action.as_str())
        .bind(&entry.actor)
        .bind(&entry.target)
        .bind(entry.result.to_string())
        .bind(&entry.details)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await;
        timer.finish(&result);

        result.map_err(storage_error)?;
        Ok(entry)
    }

    async fn list(
        &self,
        query: &AuditLogQuery,
        page: PageRequest,
    ) -> RepoResult<(Vec<AuditLogEntry>, i64)> {
        let filter = AuditLogFilterBuilder::build(query);
        let where_clause = filter.where_clause();

        let count_query = format!("SELECT COUNT(*) FROM audit_logs WHERE {}", where_clause);
        let count_builder = sqlx::query_scalar::<_, i64>(&count_query);
        let count_builder = bind_query_filters!(count_builder, query);
        let total: i64 = count_builder
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        let list_query = format!(
            r#"
            SELECT id, action, actor, target, result, details, timestamp
            FROM audit_logs
            WHERE {}
            ORDER BY timestamp DESC
            LIMIT ${} OFFSET ${}
            "#,
            where_clause,
            filter.param_count + 1,
            filter.param_count + 2
        );

        let timer = QueryTimer::new("list_audit_logs");
        let list_builder = sqlx::query_as::<_, AuditLogEntity>(&list_query);
        let list_builder = bind_query_filters!(list_builder, query);
        let entities = list_builder
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error);
        timer.finish(&entities);

        let logs = entities?
            .into_iter()
            .map(entity_to_domain)
            .collect::<RepoResult<Vec<_>>>()?;
        Ok((logs, total))
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected())
    }
}

/// Convert entity to domain model.
fn entity_to_domain(entity: AuditLogEntity) -> RepoResult<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: entity.id,
        action: entity
            .action
            .parse::<AuditAction>()
            .map_err(RepositoryError::Storage)?,
        actor: entity.actor,
        target: entity.target,
        result: entity
            .result
            .parse::<AuditResult>()
            .map_err(RepositoryError::Storage)?,
        details: entity.details,
        timestamp: entity.timestamp,
    })
}
