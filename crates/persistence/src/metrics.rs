//! Database metrics collection.

use metrics::{counter, gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

/// Record database query duration.
pub fn record_query_duration(query_name: &str, duration_secs: f64) {
    histogram!(
        "database_query_duration_seconds",
        "query" => query_name.to_string()
    )
    .record(duration_secs);
}

/// Count a failed query, labelled by query name.
pub fn record_query_error(query_name: &str) {
    counter!(
        "database_query_errors_total",
        "query" => query_name.to_string()
    )
    .increment(1);
}

/// Record database connection pool metrics.
///
/// Called by the metrics snapshot job.
pub fn record_pool_metrics(pool: &PgPool) -> PoolStats {
    let size = pool.size() as usize;
    let idle = pool.num_idle();
    let stats = PoolStats {
        total: size,
        idle,
        active: size.saturating_sub(idle),
    };

    gauge!("database_connections_active").set(stats.active as f64);
    gauge!("database_connections_idle").set(stats.idle as f64);
    gauge!("database_connections_total").set(stats.total as f64);
    stats
}

/// Point-in-time pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub active: usize,
}

/// Times a database operation and records it on completion.
///
/// ```ignore
/// let timer = QueryTimer::new("find_assessment_by_id");
/// let result = sqlx::query_as::<_, AssessmentEntity>(...).fetch_optional(&pool).await;
/// timer.finish(&result);
/// ```
pub struct QueryTimer {
    query_name: String,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: impl Into<String>) -> Self {
        Self {
            query_name: query_name.into(),
            start: Instant::now(),
        }
    }

    /// Record the elapsed duration.
    pub fn record(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_query_duration(&self.query_name, duration);
    }

    /// Record the elapsed duration and count the query as failed on `Err`.
    pub fn finish<T, E>(self, result: &Result<T, E>) {
        if result.is_err() {
            record_query_error(&self.query_name);
        }
        self.record();
    }
}
