//! Resilience services shared by every upstream call.
//!
//! Circuit breaking, rate limiting, retries, proxy rotation, session state
//! and the event bus that reports on all of them.

pub mod circuit_breaker;
pub mod events;
pub mod proxy;
pub mod rate_limit;
pub mod retry;
pub mod session;

// Re-export commonly used types
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitSnapshot, CircuitState};
pub use events::{
    AuthenticatedEvent, CircuitEvent, EventDispatcher, EventHandler, FailureEvent,
    LoggingHandler, OutcomeEvent, RequestEvent, ResponseEvent, RetryEvent, ScraperEvent,
};
pub use proxy::{ProxyManager, ProxyStats, RotationStrategy};
pub use rate_limit::RateLimiter;
pub use retry::{RetryOrchestrator, RetryPolicy};
pub use session::SessionCache;
