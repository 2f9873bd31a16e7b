//! Periodic metric snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One named gauge value captured by the snapshot job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetric {
    pub id: Uuid,
    pub name: String,
    pub value: f64,
    pub labels: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl SystemMetric {
    pub fn new(name: impl Into<String>, value: f64, labels: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            value,
            labels,
            recorded_at: Utc::now(),
        }
    }
}
