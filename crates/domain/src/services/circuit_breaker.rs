//! Circuit breaker guarding calls to the compliance evaluator.
//!
//! `Closed` admits every call. Reaching the failure threshold opens the
//! breaker until its reset time; calls made while open are rejected without
//! reaching the evaluator. After the reset time exactly one trial call is
//! admitted (`HalfOpen`): success closes the breaker, failure re-opens it.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound on how long callers wait while a half-open trial is in flight.
const HALF_OPEN_RECHECK: Duration = Duration::from_secs(1);

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge value published for monitoring.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// A call was rejected because the breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open, retry in {}ms", retry_after.as_millis())]
pub struct CircuitOpen {
    pub retry_after: Duration,
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// The single half-open trial. The caller must report its outcome, or call
    /// [`CircuitBreaker::abandon_trial`] if it gives up without one.
    Trial,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    failures: u32,
}

/// Point-in-time view for metrics and the processor status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Circuit breaker for external service protection.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                failures: 0,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave `Inner` half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask to make a call.
    pub fn try_acquire(&self) -> Result<Admission, CircuitOpen> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.phase {
            Phase::Closed => Ok(Admission::Normal),
            Phase::Open { until } if now >= until => {
                tracing::debug!("Circuit breaker transitioning to half-open");
                inner.phase = Phase::HalfOpen {
                    trial_in_flight: true,
                };
                Ok(Admission::Trial)
            }
            Phase::Open { until } => Err(CircuitOpen {
                retry_after: until - now,
            }),
            Phase::HalfOpen {
                trial_in_flight: false,
            } => {
                inner.phase = Phase::HalfOpen {
                    trial_in_flight: true,
                };
                Ok(Admission::Trial)
            }
            Phase::HalfOpen {
                trial_in_flight: true,
            } => Err(CircuitOpen {
                retry_after: HALF_OPEN_RECHECK.min(self.reset_timeout),
            }),
        }
    }

    /// Record a successful call made under `admission`.
    ///
    /// Only the half-open trial closes the breaker. A late success from a call
    /// admitted while closed is ignored once the breaker has opened.
    pub fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();
        match (admission, inner.phase) {
            (Admission::Trial, Phase::HalfOpen { .. }) => {
                tracing::info!("Circuit breaker closed after successful trial");
                inner.phase = Phase::Closed;
                inner.failures = 0;
            }
            (Admission::Normal, Phase::Closed) => inner.failures = 0,
            _ => tracing::debug!(?admission, "Ignoring stale success"),
        }
    }

    /// Record a failed call made under `admission`.
    pub fn record_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        match (admission, inner.phase) {
            (Admission::Normal, Phase::Closed) => {
                inner.failures = inner.failures.saturating_add(1);
                if inner.failures >= self.failure_threshold {
                    tracing::warn!(
                        failure_count = inner.failures,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened due to consecutive failures"
                    );
                    inner.phase = Phase::Open {
                        until: Instant::now() + self.reset_timeout,
                    };
                }
            }
            (Admission::Trial, Phase::HalfOpen { .. }) => {
                inner.failures = inner.failures.saturating_add(1);
                tracing::warn!("Circuit breaker trial failed, re-opening");
                inner.phase = Phase::Open {
                    until: Instant::now() + self.reset_timeout,
                };
            }
            // Already open: the reset time stands.
            _ => tracing::debug!(?admission, "Ignoring stale failure"),
        }
    }

    /// Give back a half-open trial that ended without an outcome.
    pub fn abandon_trial(&self) {
        let mut inner = self.lock();
        if let Phase::HalfOpen {
            trial_in_flight: true,
        } = inner.phase
        {
            inner.phase = Phase::HalfOpen {
                trial_in_flight: false,
            };
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.lock().phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        let now = Instant::now();
        let (state, retry_after_ms) = match inner.phase {
            Phase::Closed => (CircuitState::Closed, None),
            Phase::Open { until } if now >= until => (CircuitState::HalfOpen, None),
            Phase::Open { until } => (
                CircuitState::Open,
                Some((until - now).as_millis() as u64),
            ),
            Phase::HalfOpen { .. } => (CircuitState::HalfOpen, None),
        };
        CircuitSnapshot {
            state,
            failure_count: inner.failures,
            failure_threshold: self.failure_threshold,
            retry_after_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..2 {
            assert!(breaker.try_acquire().is_ok());
            breaker.record_failure(Admission::Normal);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure(Admission::Normal);
        assert_eq!(breaker.state(), CircuitState::Open);
        let err = breaker.try_acquire().unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure(Admission::Normal);
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.try_acquire().unwrap(), Admission::Trial);
        assert!(breaker.try_acquire().is_err());

        breaker.record_success(Admission::Trial);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.try_acquire().unwrap(), Admission::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure(Admission::Normal);
        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(breaker.try_acquire().unwrap(), Admission::Trial);
        breaker.record_failure(Admission::Trial);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(
            breaker.try_acquire().unwrap_err().retry_after,
            Duration::from_secs(10)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_lets_next_caller_in() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(5));
        breaker.record_failure(Admission::Normal);
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(breaker.try_acquire().unwrap(), Admission::Trial);
        breaker.abandon_trial();
        assert_eq!(breaker.try_acquire().unwrap(), Admission::Trial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_retry_after() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure(Admission::Normal);
        breaker.record_failure(Admission::Normal);
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 2);
        assert_eq!(snapshot.retry_after_ms, Some(60_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_skip_trial() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        // Admitted while closed, finishes after a sibling call opened the breaker.
        let slow = breaker.try_acquire().unwrap();
        let fast = breaker.try_acquire().unwrap();
        breaker.record_failure(fast);
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.record_success(slow);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.try_acquire().unwrap(), Admission::Trial);
        breaker.record_success(Admission::Trial);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_keeps_reset_time() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        let slow = breaker.try_acquire().unwrap();
        breaker.record_failure(Admission::Normal);

        tokio::time::advance(Duration::from_secs(6)).await;
        breaker.record_failure(slow);
        assert_eq!(
            breaker.try_acquire().unwrap_err().retry_after,
            Duration::from_secs(4)
        );
    }
}
