//! Periodic snapshot of orchestrator gauges into `system_metrics`.

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;

use super::scheduler::{Job, JobFrequency};
use crate::middleware::metrics::{record_circuit_state, record_processor_gauges};
use crate::services::{AssessmentProcessor, ExecutionEngine};
use domain::models::{AssessmentState, SystemMetric};
use domain::repositories::SystemMetricRepository;

pub struct MetricsSnapshotJob {
    processor: Arc<AssessmentProcessor>,
    engine: Arc<ExecutionEngine>,
    metrics: Arc<dyn SystemMetricRepository>,
    pool: Option<PgPool>,
    interval_secs: u64,
}

impl MetricsSnapshotJob {
    pub fn new(
        processor: Arc<AssessmentProcessor>,
        engine: Arc<ExecutionEngine>,
        metrics: Arc<dyn SystemMetricRepository>,
        pool: Option<PgPool>,
        interval_secs: u64,
    ) -> Self {
        Self {
            processor,
            engine,
            metrics,
            pool,
            interval_secs,
        }
    }

    /// Current gauge values as metric rows.
    pub async fn collect(&self) -> Result<Vec<SystemMetric>, String> {
        let statistics = self
            .processor
            .store()
            .get_statistics()
            .await
            .map_err(|e| format!("Failed to read assessment statistics: {}", e))?;
        let processor = self.processor.metrics();
        let executions = self.engine.get_execution_stats();

        record_processor_gauges(processor.queue_size, processor.active_count);
        record_circuit_state(processor.circuit_breaker.state);

        let mut rows: Vec<SystemMetric> = AssessmentState::ALL
            .iter()
            .map(|state| {
                SystemMetric::new(
                    "assessments",
                    statistics.count_for(*state) as f64,
                    json!({ "state": state.to_string() }),
                )
            })
            .collect();
        rows.extend([
            SystemMetric::new("assessments_awaiting_retry", statistics.awaiting_retry as f64, json!({})),
            SystemMetric::new("assessment_queue_size", processor.queue_size as f64, json!({})),
            SystemMetric::new("assessment_active_count", processor.active_count as f64, json!({})),
            SystemMetric::new(
                "circuit_breaker_state",
                processor.circuit_breaker.state.as_gauge(),
                json!({ "state": processor.circuit_breaker.state.to_string() }),
            ),
            SystemMetric::new("remediation_active_executions", executions.active as f64, json!({})),
            SystemMetric::new("remediation_executions_total", executions.total as f64, json!({})),
            SystemMetric::new(
                "remediation_rollbacks_total",
                executions.rollbacks_executed as f64,
                json!({}),
            ),
        ]);
        if let Some(score) = statistics.average_score {
            rows.push(SystemMetric::new("assessment_average_score", score, json!({})));
        }

        if let Some(pool) = &self.pool {
            let stats = persistence::metrics::record_pool_metrics(pool);
            rows.push(SystemMetric::new("database_connections_active", stats.active as f64, json!({})));
            rows.push(SystemMetric::new("database_connections_idle", stats.idle as f64, json!({})));
        }
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl Job for MetricsSnapshotJob {
    fn name(&self) -> &'static str {
        "metrics_snapshot"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let rows = self.collect().await?;
        self.metrics
            .record_batch(&rows)
            .await
            .map_err(|e| format!("Failed to store metric snapshot: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionConfig, ProcessorConfig};
    use crate::services::{EngineSettings, ProcessorSettings};
    use domain::repositories::memory::{
        InMemoryAssessmentRepository, InMemoryAuditLogRepository, InMemoryRemediationRepository,
        InMemorySystemMetricRepository,
    };
    use domain::services::{
        AssessmentStore, AuditLogger, CircuitBreaker, LocalComplianceEvaluator, RuleEngine,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn test_snapshot_records_rows() {
        let audit = AuditLogger::new(Arc::new(InMemoryAuditLogRepository::new()));
        let store = Arc::new(AssessmentStore::new(
            Arc::new(InMemoryAssessmentRepository::new()),
            audit.clone(),
        ));
        let rules = Arc::new(RuleEngine::with_default_rules());
        let processor = Arc::new(AssessmentProcessor::new(
            store,
            Arc::new(LocalComplianceEvaluator::new(rules.clone(), vec![])),
            Arc::new(CircuitBreaker::new(5, Duration::from_secs(30))),
            ProcessorSettings::from_config(&ProcessorConfig::default()),
        ));
        let engine = Arc::new(ExecutionEngine::new(
            EngineSettings::from_config(&ExecutionConfig::default()),
            rules,
            Arc::new(InMemoryRemediationRepository::new()),
            audit,
        ));
        let metrics = Arc::new(InMemorySystemMetricRepository::new());

        let job = MetricsSnapshotJob::new(processor, engine, metrics.clone(), None, 60);
        job.execute().await.unwrap();

        let rows = metrics.snapshot().await;
        assert!(rows
            .iter()
            .any(|m| m.name == "assessments" && m.labels["state"] == "PENDING"));
        let breaker = rows
            .iter()
            .find(|m| m.name == "circuit_breaker_state")
            .unwrap();
        assert_eq!(breaker.value, 0.0);
        assert!(!rows.iter().any(|m| m.name == "assessment_average_score"));
    }
}
