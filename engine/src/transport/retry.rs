//! Retry budget and backoff curve for panel calls.

use std::time::Duration;

use crate::error::{ApiError, ApiErrorKind};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. 3 means at most 4 calls.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(4),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No retries at all, for callers that want single-shot semantics.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponential =
            self.base_delay.as_secs_f64() * self.multiplier.powi(retry.min(31) as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            let factor = 0.5 + fastrand::f64();
            (capped * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Whether a failed attempt may be issued again.
    ///
    /// Writes get the same budget as reads: a 429 was never processed, and
    /// network/5xx retries are bounded by `max_retries`.
    pub fn should_retry(&self, err: &ApiError, retries_done: u32) -> bool {
        retries_done < self.max_retries && err.is_retryable()
    }

    /// Sleep before the next attempt. `Retry-After` wins for 429 when present.
    pub fn sleep_for(&self, err: &ApiError, retry_after: Option<Duration>, retry: u32) -> Duration {
        if err.kind == ApiErrorKind::RateLimited {
            if let Some(d) = retry_after {
                return d;
            }
        }
        self.delay_for(retry)
    }
}
