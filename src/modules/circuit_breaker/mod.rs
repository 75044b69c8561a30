//! Per-target circuit breakers.
//!
//! A breaker opens after `failure_threshold` consecutive failures, rejects
//! calls for `recovery_timeout`, then lets exactly one probe through.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            probe_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Whether a call may proceed. Moves `Open` to `HalfOpen` once the
    /// recovery window has elapsed and reserves the single probe slot.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = self
                    .last_failure_at
                    .is_none_or(|at| at.elapsed() >= self.recovery_timeout);
                if recovered {
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                }
                recovered
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.probe_in_flight = false;
    }

    /// Returns the state after recording.
    pub fn record_failure(&mut self) -> CircuitState {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(Instant::now());
        self.probe_in_flight = false;
        match self.state {
            CircuitState::HalfOpen => self.state = CircuitState::Open,
            CircuitState::Closed if self.failure_count >= self.failure_threshold => {
                self.state = CircuitState::Open
            }
            _ => {}
        }
        self.state
    }

    /// Frees the probe slot of an abandoned probe (cancelled or dropped)
    /// without judging the target.
    pub fn release_probe(&mut self) {
        self.probe_in_flight = false;
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            since_last_failure: self.last_failure_at.map(|at| at.elapsed()),
        }
    }
}

/// Point-in-time copy of a breaker, for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub since_last_failure: Option<Duration>,
}

/// Lazily created breakers keyed by logical target.
#[derive(Clone, Debug)]
pub struct CircuitBreakerRegistry {
    inner: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            failure_threshold,
            recovery_timeout,
        }
    }

    fn update<T>(&self, key: &str, f: impl FnOnce(&mut CircuitBreaker) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let breaker = guard
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.failure_threshold, self.recovery_timeout));
        f(breaker)
    }

    pub fn can_execute(&self, key: &str) -> bool {
        self.update(key, CircuitBreaker::can_execute)
    }

    pub fn record_success(&self, key: &str) {
        self.update(key, CircuitBreaker::record_success);
    }

    pub fn record_failure(&self, key: &str) -> CircuitState {
        self.update(key, CircuitBreaker::record_failure)
    }

    pub fn release_probe(&self, key: &str) {
        self.update(key, CircuitBreaker::release_probe);
    }

    /// `Closed` for targets never seen.
    pub fn state(&self, key: &str) -> CircuitState {
        self.snapshot(key)
            .map(|snapshot| snapshot.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, key: &str) -> Option<CircuitSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(CircuitBreaker::snapshot)
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            breaker.record_failure();
            assert!(breaker.can_execute());
        }
        assert_eq!(breaker.record_failure(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn success_resets_consecutive_count() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[test]
    fn half_open_allows_single_probe_then_closes() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(50));
        breaker.record_failure();
        assert!(!breaker.can_execute());

        std::thread::sleep(Duration::from_millis(80));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.can_execute());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.can_execute());
    }

    #[test]
    fn failed_probe_reopens_and_restarts_window() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(50));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(80));
        assert!(breaker.can_execute());
        assert_eq!(breaker.record_failure(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn registry_keeps_targets_apart() {
        let registry = CircuitBreakerRegistry::new(1, Duration::from_secs(60));
        assert_eq!(registry.state("TJGO"), CircuitState::Closed);
        assert!(registry.snapshot("TJGO").is_none());

        registry.record_failure("TJGO");
        assert!(!registry.can_execute("TJGO"));
        assert!(registry.can_execute("TJSP"));

        let snapshot = registry.snapshot("TJGO").unwrap();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 1);
        assert!(snapshot.since_last_failure.is_some());
    }
}
