//! Prometheus metrics middleware and business metric helpers.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use domain::models::ExecutionStatus;
use domain::services::CircuitState;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Middleware to record HTTP request metrics.
///
/// Records the following metrics:
/// - `http_requests_total`: Counter with labels (method, path, status)
/// - `http_request_duration_seconds`: Histogram with labels (method, path)
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let method_str = method_to_str(&method);

    counter!(
        "http_requests_total",
        "method" => method_str.to_string(),
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method_str.to_string(),
        "path" => path
    )
    .record(duration);

    response
}

fn method_to_str(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

/// Count one processed assessment. `outcome` is `completed`, `retry_scheduled`,
/// `failed`, `deferred` or `cancelled`.
pub fn record_assessment_processed(outcome: &'static str, duration: Duration) {
    counter!("assessments_processed_total", "outcome" => outcome).increment(1);
    histogram!("assessment_processing_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_assessment_requested(assessment_type: String) {
    counter!("assessments_requested_total", "type" => assessment_type).increment(1);
}

pub fn record_processor_gauges(queue_size: usize, active: usize) {
    gauge!("assessment_queue_size").set(queue_size as f64);
    gauge!("assessment_active_count").set(active as f64);
}

/// 0 closed, 1 half-open, 2 open.
pub fn record_circuit_state(state: CircuitState) {
    gauge!("circuit_breaker_state").set(state.as_gauge());
}

pub fn record_circuit_transition(from: CircuitState, to: CircuitState) {
    counter!(
        "circuit_breaker_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_remediation_execution(status: ExecutionStatus, rolled_back: bool) {
    counter!(
        "remediation_executions_total",
        "status" => status.as_str(),
        "rolled_back" => if rolled_back { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_remediation_duration(action_type: String, duration: Duration) {
    histogram!(
        "remediation_execution_duration_seconds",
        "action_type" => action_type
    )
    .record(duration.as_secs_f64());
}

pub fn record_job_run(job: &'static str, success: bool) {
    counter!(
        "background_job_runs_total",
        "job" => job,
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Handler for /metrics endpoint that returns Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
    } else {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            [(axum::http::header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        )
    }
}

/// Install the global Prometheus recorder.
///
/// Must be called once during startup before any metrics are recorded. A
/// second call is a no-op.
pub fn init_metrics() -> Result<(), BuildError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(&[
            0.001, 0.005, 0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 15.0, 30.0, 60.0,
        ])?
        .install_recorder()?;

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Prometheus handle already initialized");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_to_str() {
        assert_eq!(method_to_str(&Method::GET), "GET");
        assert_eq!(method_to_str(&Method::POST), "POST");
        assert_eq!(method_to_str(&Method::DELETE), "DELETE");
        assert_eq!(method_to_str(&Method::TRACE), "OTHER");
    }

    #[tokio::test]
    async fn test_metrics_handler_without_recorder() {
        if PROMETHEUS_HANDLE.get().is_some() {
            return;
        }
        let response = metrics_handler().await.into_response();
        assert_eq!(
            response.status(),
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_helpers_without_recorder_are_noops() {
        record_assessment_processed("completed", Duration::from_millis(5));
        record_circuit_state(CircuitState::Open);
        record_remediation_execution(ExecutionStatus::Partial, false);
        record_job_run("retry_scan", true);
    }
}
