//! Background job scheduler and job implementations.

mod circuit_monitor;
mod metrics_snapshot;
mod retention_cleanup;
mod retry_scan;
mod scheduler;

pub use circuit_monitor::CircuitMonitorJob;
pub use metrics_snapshot::MetricsSnapshotJob;
pub use retention_cleanup::{CleanupReport, RetentionCleanupJob};
pub use retry_scan::RetryScanJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
