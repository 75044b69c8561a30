//! Exponential backoff with jitter for the retry orchestrator.

use std::time::Duration;

use crate::error::ScraperError;

/// Delay schedule between attempts of one logical operation.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    variance_pct: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            variance_pct: 0.5,
        }
    }

    /// Total jitter band as a fraction of the computed delay (0.5 = ±25 %).
    pub fn with_variance(mut self, variance_pct: f64) -> Self {
        self.variance_pct = variance_pct.clamp(0.0, 1.0);
        self
    }

    /// Delay before attempt `failed_attempt + 1`, for a 1-based attempt count.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16) as i32;
        let max = self.max.as_secs_f64();
        let mut delay = (self.base.as_secs_f64() * 2f64.powi(exponent)).min(max);

        let variance = delay * self.variance_pct;
        let jitter = rand::random::<f64>() * variance - (variance / 2.0);
        delay = (delay + jitter).clamp(0.0, max);
        Duration::from_secs_f64(delay)
    }

    /// Like [`delay_for`](Self::delay_for), stretched for upstream throttling:
    /// the server's `Retry-After` is added when known, otherwise the delay
    /// doubles. `None` when the server asks to wait longer than the maximum
    /// backoff; the caller gives up instead of sleeping.
    pub fn delay_after(&self, failed_attempt: u32, error: &ScraperError) -> Option<Duration> {
        let delay = self.delay_for(failed_attempt);
        match error {
            ScraperError::RateLimit {
                retry_after: Some(wait),
            } if *wait > self.max => None,
            ScraperError::RateLimit {
                retry_after: Some(wait),
            } => Some(delay.saturating_add(*wait)),
            ScraperError::RateLimit { retry_after: None } => Some(delay.saturating_mul(2)),
            _ => Some(delay),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
