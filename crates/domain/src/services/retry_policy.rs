//! Exponential backoff with jitter for failed assessments.

use rand::Rng;
use std::time::Duration;

/// What to do with an assessment whose evaluation just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`; `attempt` is the new retry count.
    RetryAfter { delay: Duration, attempt: i32 },
    /// Out of retries.
    GiveUp,
}

/// `delay = min(base * 2^retry_count + jitter, max)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter is drawn uniformly from `0..=max_jitter`.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before jitter for a record that has already been retried
    /// `retry_count` times.
    pub fn base_backoff(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.clamp(0, 31) as u32;
        let factor = 2u32.saturating_pow(exponent);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        (self.base_backoff(retry_count) + jitter).min(self.max_delay)
    }

    pub fn decide(&self, retry_count: i32) -> RetryDecision {
        if retry_count < self.max_retries {
            RetryDecision::RetryAfter {
                delay: self.delay_for(retry_count),
                attempt: retry_count + 1,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
