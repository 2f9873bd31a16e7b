//! Health check endpoint handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::app::AppState;
use domain::services::CircuitState;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseHealth,
    pub evaluator: EvaluatorHealth,
}

/// Database health status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseHealth {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

/// Compliance evaluator status as seen through the circuit breaker.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EvaluatorHealth {
    pub name: &'static str,
    /// False only while the breaker is open.
    pub available: bool,
    pub circuit_state: String,
}

/// Simple status response for liveness/readiness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Full health check endpoint.
///
/// An open breaker degrades the service but does not fail the check;
/// assessments keep queueing and retry once the evaluator recovers.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let start = std::time::Instant::now();
    let db_connected = state.store.ping().await.is_ok();
    let latency_ms = start.elapsed().as_millis() as u64;

    let metrics = state.processor.metrics();
    let circuit_state = metrics.circuit_breaker.state;
    let evaluator = EvaluatorHealth {
        name: metrics.evaluator,
        available: circuit_state != CircuitState::Open,
        circuit_state: circuit_state.to_string(),
    };

    let status = match (db_connected, evaluator.available) {
        (false, _) => "unhealthy",
        (true, false) => "degraded",
        (true, true) => "healthy",
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: DatabaseHealth {
            connected: db_connected,
            latency_ms: if db_connected { Some(latency_ms) } else { None },
        },
        evaluator,
    };

    if db_connected {
        Ok(Json(response))
    } else {
        tracing::warn!("Health check failed: storage unreachable");
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 OK if the service can accept traffic (storage reachable).
pub async fn ready(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    if state.store.ping().await.is_ok() {
        Ok(Json(StatusResponse {
            status: "ready".to_string(),
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "degraded".to_string(),
            version: "0.1.0".to_string(),
            database: DatabaseHealth {
                connected: true,
                latency_ms: Some(3),
            },
            evaluator: EvaluatorHealth {
                name: "remote",
                available: false,
                circuit_state: CircuitState::Open.to_string(),
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["database"]["latency_ms"], 3);
        assert_eq!(json["evaluator"]["available"], false);
        assert_eq!(json["evaluator"]["circuit_state"], CircuitState::Open.to_string());
    }

    #[test]
    fn test_status_response() {
        let response = StatusResponse {
            status: "alive".to_string(),
        };
        assert_eq!(serde_json::to_value(&response).unwrap()["status"], "alive");
    }
}
