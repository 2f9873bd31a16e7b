//! Publishes the evaluator circuit breaker state and logs transitions.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::scheduler::{Job, JobFrequency};
use crate::middleware::metrics::{record_circuit_state, record_circuit_transition};
use domain::services::{CircuitBreaker, CircuitState};

pub struct CircuitMonitorJob {
    breaker: Arc<CircuitBreaker>,
    interval_secs: u64,
    last_state: Mutex<CircuitState>,
}

impl CircuitMonitorJob {
    pub fn new(breaker: Arc<CircuitBreaker>, interval_secs: u64) -> Self {
        let initial = breaker.state();
        Self {
            breaker,
            interval_secs,
            last_state: Mutex::new(initial),
        }
    }

    /// Record the current state; returns the previous one when it changed.
    fn observe(&self) -> Option<(CircuitState, CircuitState)> {
        let current = self.breaker.state();
        record_circuit_state(current);

        let mut last = self.last_state.lock().unwrap_or_else(|e| e.into_inner());
        if *last == current {
            return None;
        }
        let previous = std::mem::replace(&mut *last, current);
        record_circuit_transition(previous, current);
        Some((previous, current))
    }
}

#[async_trait::async_trait]
impl Job for CircuitMonitorJob {
    fn name(&self) -> &'static str {
        "circuit_monitor"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        if let Some((from, to)) = self.observe() {
            let snapshot = self.breaker.snapshot();
            match to {
                CircuitState::Open => warn!(
                    from = %from,
                    failures = snapshot.failure_count,
                    retry_after_ms = ?snapshot.retry_after_ms,
                    "Evaluator circuit opened"
                ),
                _ => info!(from = %from, to = %to, "Evaluator circuit state changed"),
            }
        }
        Ok(())
    }
}
