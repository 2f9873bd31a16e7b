//! Time-based retention for assessments, audit logs, metric snapshots and
//! remediation backups.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;

use super::scheduler::{Job, JobFrequency};
use crate::config::RetentionConfig;
use crate::services::execution_engine::backup::BackupManager;
use domain::repositories::{AuditLogRepository, SystemMetricRepository};
use domain::services::AssessmentStore;

/// Rows and directories removed by one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub assessments: u64,
    pub audit_logs: u64,
    pub metrics: u64,
    pub backups: usize,
}

pub struct RetentionCleanupJob {
    store: Arc<AssessmentStore>,
    audit_logs: Arc<dyn AuditLogRepository>,
    metrics: Arc<dyn SystemMetricRepository>,
    backups: BackupManager,
    retention: RetentionConfig,
}

impl RetentionCleanupJob {
    pub fn new(
        store: Arc<AssessmentStore>,
        audit_logs: Arc<dyn AuditLogRepository>,
        metrics: Arc<dyn SystemMetricRepository>,
        backups: BackupManager,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            store,
            audit_logs,
            metrics,
            backups,
            retention,
        }
    }

    /// Delete everything past its retention window.
    pub async fn run_once(&self) -> Result<CleanupReport, String> {
        let now = Utc::now();

        let assessments = self
            .store
            .purge_older_than(now - Duration::days(self.retention.assessment_days))
            .await
            .map_err(|e| format!("Failed to purge assessments: {}", e))?;
        let audit_logs = self
            .audit_logs
            .delete_before(now - Duration::days(self.retention.audit_log_days))
            .await
            .map_err(|e| format!("Failed to purge audit logs: {}", e))?;
        let metrics = self
            .metrics
            .delete_before(now - Duration::days(self.retention.metrics_days))
            .await
            .map_err(|e| format!("Failed to purge system metrics: {}", e))?;
        let backups = self
            .backups
            .purge_older_than(now - Duration::days(self.retention.backup_days))
            .await
            .map_err(|e| format!("Failed to purge backups: {}", e))?;

        Ok(CleanupReport {
            assessments,
            audit_logs,
            metrics,
            backups,
        })
    }
}

#[async_trait::async_trait]
impl Job for RetentionCleanupJob {
    fn name(&self) -> &'static str {
        "retention_cleanup"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(self.retention.cleanup_interval_minutes)
    }

    async fn execute(&self) -> Result<(), String> {
        let report = self.run_once().await?;
        info!(
            assessments = report.assessments,
            audit_logs = report.audit_logs,
            metrics = report.metrics,
            backups = report.backups,
            "Retention cleanup completed"
        );
        Ok(())
    }
}
