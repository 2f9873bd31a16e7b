//! Re-queues FAILED assessments whose retry time has come, after failing
//! PROCESSING ones that no evaluation in flight owns.

use std::sync::Arc;

use tracing::info;

use super::scheduler::{Job, JobFrequency};
use crate::services::AssessmentProcessor;

pub struct RetryScanJob {
    processor: Arc<AssessmentProcessor>,
    interval_secs: u64,
    limit: i64,
}

impl RetryScanJob {
    pub fn new(processor: Arc<AssessmentProcessor>, interval_secs: u64, limit: i64) -> Self {
        Self {
            processor,
            interval_secs,
            limit,
        }
    }
}

#[async_trait::async_trait]
impl Job for RetryScanJob {
    fn name(&self) -> &'static str {
        "retry_scan"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let queued = self
            .processor
            .enqueue_due(self.limit)
            .await
            .map_err(|e| format!("Failed to scan for due retries: {}", e))?;
        if queued > 0 {
            info!(queued, "Due assessment retries queued");
        }
        Ok(())
    }
}
