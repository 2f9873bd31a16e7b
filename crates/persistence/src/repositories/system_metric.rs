//! System metric snapshot repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::SystemMetric;
use domain::repositories::{RepoResult, SystemMetricRepository};
use sqlx::PgPool;

use super::storage_error;
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct PgSystemMetricRepository {
    pool: PgPool,
}

impl PgSystemMetricRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SystemMetricRepository for PgSystemMetricRepository {
    async fn record_batch(&self, metrics: &[SystemMetric]) -> RepoResult<()> {
        if metrics.is_empty() {
            return Ok(());
        }
        let timer = QueryTimer::new("insert_system_metrics");
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        for metric in metrics {
            sqlx::query(
                r#"
                INSERT INTO system_metrics (id, name, value, labels, recorded_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(metric.id)
            .bind(&metric.name)
            .bind(metric.value)
            .bind(&metric.labels)
            .bind(metric.recorded_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }
        tx.commit().await.map_err(storage_error)?;
        timer.record();
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM system_metrics WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected())
    }
}
