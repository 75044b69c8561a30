//! Retry orchestration around one logical upstream operation.
//!
//! Per attempt: circuit breaker gate, rate limiter, I/O, classification.
//! This is the only place deciding whether an error is retried or
//! propagated.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::core::BackoffPolicy;
use crate::error::{ScraperError, ScraperResult};
use crate::modules::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use crate::modules::events::{
    CircuitEvent, EventDispatcher, FailureEvent, OutcomeEvent, RetryEvent, ScraperEvent,
};
use crate::modules::rate_limit::RateLimiter;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffPolicy::default())
    }
}

#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    policy: RetryPolicy,
    breakers: CircuitBreakerRegistry,
    rate_limiter: Arc<RateLimiter>,
    events: Arc<EventDispatcher>,
}

impl RetryOrchestrator {
    pub fn new(
        policy: RetryPolicy,
        breakers: CircuitBreakerRegistry,
        rate_limiter: Arc<RateLimiter>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            policy,
            breakers,
            rate_limiter,
            events,
        }
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, fails non-retryably, exhausts
    /// `max_retries`, or `cancel` fires. `op` receives the 1-based attempt.
    ///
    /// A breaker that blocks the call fails fast with
    /// [`ScraperError::CircuitBreakerOpen`] without recording a failure.
    pub async fn execute<T, F, Fut>(
        &self,
        target: &str,
        operation: &str,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> ScraperResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ScraperResult<T>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(ScraperError::Cancelled);
            }

            if !self.breakers.can_execute(target) {
                log::debug!("[{target}] {operation} short-circuited by open breaker");
                return Err(ScraperError::CircuitBreakerOpen {
                    target: target.to_string(),
                });
            }
            let probing = self.breakers.state(target) == CircuitState::HalfOpen;
            let slot = probing.then(|| ProbeSlot::reserve(&self.breakers, target));

            let outcome = match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(ScraperError::Cancelled),
                        result = async {
                            self.rate_limiter.enforce().await;
                            op(attempt).await
                        } => result,
                    }
                }
                None => {
                    self.rate_limiter.enforce().await;
                    op(attempt).await
                }
            };

            let error = match outcome {
                Ok(value) => {
                    self.breakers.record_success(target);
                    if let Some(slot) = slot {
                        slot.settle();
                    }
                    self.events.dispatch(ScraperEvent::Success(OutcomeEvent {
                        target: target.to_string(),
                        operation: operation.to_string(),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                        timestamp: Utc::now(),
                    }));
                    return Ok(value);
                }
                Err(ScraperError::Cancelled) => {
                    log::debug!("[{target}] {operation} cancelled on attempt {attempt}");
                    return Err(ScraperError::Cancelled);
                }
                Err(error) => error,
            };

            let delay = if error.is_retryable() && !probing && attempt <= self.policy.max_retries {
                self.policy.backoff.delay_after(attempt, &error)
            } else {
                None
            };
            if let Some(delay) = delay {
                self.events.dispatch(ScraperEvent::Retry(RetryEvent {
                    target: target.to_string(),
                    operation: operation.to_string(),
                    attempt,
                    reason: error.to_string(),
                    scheduled_after: delay,
                    timestamp: Utc::now(),
                }));
                if !self.pause(delay, cancel).await {
                    return Err(ScraperError::Cancelled);
                }
                continue;
            }

            self.fail(target, operation, attempt, &error);
            if let Some(slot) = slot {
                slot.settle();
            }
            return Err(error);
        }
    }

    /// Returns `false` when cancelled while waiting.
    async fn pause(&self, delay: Duration, cancel: Option<&CancellationToken>) -> bool {
        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    fn fail(&self, target: &str, operation: &str, attempts: u32, error: &ScraperError) {
        let before = self.breakers.state(target);
        let after = self.breakers.record_failure(target);
        self.events.dispatch(ScraperEvent::Failure(FailureEvent {
            target: target.to_string(),
            operation: operation.to_string(),
            kind: error.kind(),
            error: error.to_string(),
            attempts,
            timestamp: Utc::now(),
        }));
        if after == CircuitState::Open && before != CircuitState::Open {
            let failure_count = self
                .breakers
                .snapshot(target)
                .map(|snapshot| snapshot.failure_count)
                .unwrap_or_default();
            self.events.dispatch(ScraperEvent::CircuitOpened(CircuitEvent {
                target: target.to_string(),
                state: after,
                failure_count,
                timestamp: Utc::now(),
            }));
        }
    }
}

/// Half-open probe reservation. Unless settled by a recorded outcome, the
/// slot is freed on drop, so an abandoned probe never wedges the breaker.
struct ProbeSlot<'a> {
    breakers: &'a CircuitBreakerRegistry,
    target: &'a str,
    armed: bool,
}

impl<'a> ProbeSlot<'a> {
    fn reserve(breakers: &'a CircuitBreakerRegistry, target: &'a str) -> Self {
        Self {
            breakers,
            target,
            armed: true,
        }
    }

    fn settle(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            log::debug!("[{}] abandoned probe released", self.target);
            self.breakers.release_probe(self.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn orchestrator(max_retries: u32, threshold: u32, recovery: Duration) -> RetryOrchestrator {
        RetryOrchestrator::new(
            RetryPolicy::new(
                max_retries,
                BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(20)),
            ),
            CircuitBreakerRegistry::new(threshold, recovery),
            Arc::new(RateLimiter::new(Duration::ZERO)),
            Arc::new(EventDispatcher::new()),
        )
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let orch = orchestrator(3, 5, Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let result = orch
            .execute("TJGO", "fetch", None, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(ScraperError::Server { status: 503 })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(orch.breakers().snapshot("TJGO").unwrap().failure_count, 0);
    }

    #[tokio::test]
    async fn never_retries_non_retryable_errors() {
        let orch = orchestrator(3, 5, Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let result: ScraperResult<()> = orch
            .execute("TJGO", "login", None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ScraperError::Authentication("rejected".into())) }
            })
            .await;
        assert!(matches!(result, Err(ScraperError::Authentication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.breakers().snapshot("TJGO").unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn exhaustion_records_one_failure_and_propagates() {
        let orch = orchestrator(2, 5, Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let result: ScraperResult<()> = orch
            .execute("TRF1", "fetch", None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ScraperError::Connection("reset".into())) }
            })
            .await;
        assert!(matches!(result, Err(ScraperError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(orch.breakers().snapshot("TRF1").unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_without_io() {
        let orch = orchestrator(0, 1, Duration::from_secs(60));
        let _: ScraperResult<()> = orch
            .execute("TJSP", "fetch", None, |_| async {
                Err(ScraperError::Server { status: 500 })
            })
            .await;

        let calls = AtomicU32::new(0);
        let result: ScraperResult<()> = orch
            .execute("TJSP", "fetch", None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(ScraperError::CircuitBreakerOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_half_open_probe_is_not_retried() {
        let orch = orchestrator(3, 1, Duration::from_millis(30));
        let _: ScraperResult<()> = orch
            .execute("TJGO", "fetch", None, |_| async {
                Err(ScraperError::Validation("bad".into()))
            })
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let calls = AtomicU32::new(0);
        let result: ScraperResult<()> = orch
            .execute("TJGO", "fetch", None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ScraperError::Server { status: 502 }) }
            })
            .await;
        assert!(matches!(result, Err(ScraperError::Server { status: 502 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.breakers().state("TJGO"), CircuitState::Open);
    }

    #[tokio::test]
    async fn dropped_half_open_attempt_frees_the_slot() {
        let orch = orchestrator(0, 1, Duration::from_millis(30));
        let _: ScraperResult<()> = orch
            .execute("TJGO", "fetch", None, |_| async {
                Err(ScraperError::Server { status: 500 })
            })
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            orch.execute("TJGO", "fetch", None, |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, ScraperError>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(orch.breakers().state("TJGO"), CircuitState::HalfOpen);

        let calls = AtomicU32::new(0);
        let result = orch
            .execute("TJGO", "fetch", None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.breakers().state("TJGO"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn oversized_retry_after_is_not_slept_on() {
        let orch = orchestrator(3, 5, Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result: ScraperResult<()> = orch
            .execute("TJSP", "fetch", None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ScraperError::RateLimit {
                        retry_after: Some(Duration::from_secs(86_400)),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(ScraperError::RateLimit { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_attempt() {
        let orch = orchestrator(3, 5, Duration::from_secs(60));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result: ScraperResult<()> = orch
            .execute("TJGO", "fetch", Some(&token), |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ScraperError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(orch.breakers().snapshot("TJGO").is_some_and(|s| s.failure_count == 0));
    }
}
