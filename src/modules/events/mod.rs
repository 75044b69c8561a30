//! Structured events emitted around every upstream interaction.
//!
//! Handlers receive requests, responses, retries and terminal outcomes. The
//! library only logs through the `log` facade and never installs a logger.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::ErrorKind;
use crate::modules::circuit_breaker::CircuitState;

#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub target: String,
    pub method: Method,
    pub url: Url,
    pub proxy: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub target: String,
    pub method: Method,
    pub url: Url,
    pub status: u16,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub target: String,
    pub operation: String,
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OutcomeEvent {
    pub target: String,
    pub operation: String,
    pub attempts: u32,
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub target: String,
    pub operation: String,
    pub kind: ErrorKind,
    pub error: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CircuitEvent {
    pub target: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedEvent {
    pub target: String,
    pub method: String,
    pub expires_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ScraperEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
    Retry(RetryEvent),
    Success(OutcomeEvent),
    Failure(FailureEvent),
    CircuitOpened(CircuitEvent),
    Authenticated(AuthenticatedEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ScraperEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Dispatcher with [`LoggingHandler`] already registered.
    pub fn with_logging() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: ScraperEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &ScraperEvent) {
        match event {
            ScraperEvent::Request(req) => {
                log::debug!(
                    "[{}] -> {} {}{}",
                    req.target,
                    req.method,
                    req.url,
                    req.proxy
                        .as_deref()
                        .map(|proxy| format!(" via {proxy}"))
                        .unwrap_or_default()
                );
            }
            ScraperEvent::Response(resp) => {
                log::debug!(
                    "[{}] <- {} {} -> {} ({:.2}s)",
                    resp.target,
                    resp.method,
                    resp.url,
                    resp.status,
                    resp.latency.as_secs_f64()
                );
            }
            ScraperEvent::Retry(retry) => {
                log::info!(
                    "[{}] retry {} attempt {} after {:.2}s: {}",
                    retry.target,
                    retry.operation,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
            ScraperEvent::Success(success) => {
                log::info!(
                    "[{}] {} succeeded after {} attempt(s) in {:.2}s",
                    success.target,
                    success.operation,
                    success.attempts,
                    success.elapsed.as_secs_f64()
                );
            }
            ScraperEvent::Failure(failure) => {
                log::warn!(
                    "[{}] {} failed ({:?}) after {} attempt(s): {}",
                    failure.target,
                    failure.operation,
                    failure.kind,
                    failure.attempts,
                    failure.error
                );
            }
            ScraperEvent::CircuitOpened(circuit) => {
                log::warn!(
                    "[{}] circuit breaker {:?} after {} consecutive failure(s)",
                    circuit.target,
                    circuit.state,
                    circuit.failure_count
                );
            }
            ScraperEvent::Authenticated(auth) => {
                log::info!(
                    "[{}] authenticated via {} (session valid until {})",
                    auth.target,
                    auth.method,
                    auth.expires_at.to_rfc3339()
                );
            }
        }
    }
}
