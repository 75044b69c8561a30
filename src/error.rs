//! Error taxonomy shared by every component.
//!
//! Components only classify outcomes into one of these variants; the retry
//! orchestrator is the single place that decides whether a variant is retried
//! or propagated.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::core::TransportError;

/// Result alias used across the crate.
pub type ScraperResult<T> = Result<T, ScraperError>;

/// Longest raw HTML excerpt attached to a [`ScraperError::Parse`].
pub const PARSE_SNIPPET_LIMIT: usize = 500;

/// Every failure the client can surface to its caller.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimit { retry_after: Option<Duration> },
    #[error("upstream server error: HTTP {status}")]
    Server { status: u16 },
    #[error("circuit breaker open for '{target}'")]
    CircuitBreakerOpen { target: String },
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("authentication result is ambiguous: {0}")]
    AuthenticationAmbiguous(String),
    #[error("certificate authentication unavailable: {0}")]
    CertificateUnavailable(String),
    #[error("captcha challenge detected: {0}")]
    Captcha(String),
    #[error("process {numero} not found")]
    ProcessoNaoEncontrado { numero: String },
    #[error("session expired or rejected by {target}")]
    SessaoExpirada { target: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no tribunal mapped for process {numero}")]
    TribunalNaoDetectado { numero: String },
    #[error("unrecognised page structure: {message}")]
    Parse { message: String, snippet: String },
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("operation cancelled")]
    Cancelled,
}

/// Flat classification of [`ScraperError`] used for logging and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    RateLimit,
    Server,
    CircuitBreakerOpen,
    Authentication,
    Captcha,
    NotFound,
    SessionExpired,
    Validation,
    Parse,
    Config,
    Cancelled,
}

impl ScraperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScraperError::Connection(_) => ErrorKind::Connection,
            ScraperError::RateLimit { .. } => ErrorKind::RateLimit,
            ScraperError::Server { .. } => ErrorKind::Server,
            ScraperError::CircuitBreakerOpen { .. } => ErrorKind::CircuitBreakerOpen,
            ScraperError::Authentication(_)
            | ScraperError::AuthenticationAmbiguous(_)
            | ScraperError::CertificateUnavailable(_) => ErrorKind::Authentication,
            ScraperError::Captcha(_) => ErrorKind::Captcha,
            ScraperError::ProcessoNaoEncontrado { .. } => ErrorKind::NotFound,
            ScraperError::SessaoExpirada { .. } => ErrorKind::SessionExpired,
            ScraperError::Validation(_) | ScraperError::TribunalNaoDetectado { .. } => {
                ErrorKind::Validation
            }
            ScraperError::Parse { .. } => ErrorKind::Parse,
            ScraperError::Config(_) => ErrorKind::Config,
            ScraperError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Transient transport-level failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScraperError::Connection(_) | ScraperError::RateLimit { .. } | ScraperError::Server { .. }
        )
    }

    /// Builds a parse error carrying a bounded excerpt of the offending page.
    pub fn parse(message: impl Into<String>, raw: &str) -> Self {
        let snippet: String = raw.chars().take(PARSE_SNIPPET_LIMIT).collect();
        ScraperError::Parse {
            message: message.into(),
            snippet,
        }
    }
}

impl From<TransportError> for ScraperError {
    fn from(err: TransportError) -> Self {
        ScraperError::Connection(err.to_string())
    }
}

impl From<url::ParseError> for ScraperError {
    fn from(err: url::ParseError) -> Self {
        ScraperError::Validation(format!("invalid url: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(ScraperError::Connection("reset".into()).is_retryable());
        assert!(ScraperError::Server { status: 503 }.is_retryable());
        assert!(ScraperError::RateLimit { retry_after: None }.is_retryable());

        assert!(!ScraperError::Authentication("bad".into()).is_retryable());
        assert!(!ScraperError::Validation("bad".into()).is_retryable());
        assert!(!ScraperError::Captcha("widget".into()).is_retryable());
        assert!(!ScraperError::CircuitBreakerOpen { target: "TJGO".into() }.is_retryable());
        assert!(
            !ScraperError::ProcessoNaoEncontrado {
                numero: "x".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn parse_error_truncates_snippet() {
        let raw = "a".repeat(PARSE_SNIPPET_LIMIT * 2);
        match ScraperError::parse("no fields", &raw) {
            ScraperError::Parse { snippet, .. } => assert_eq!(snippet.len(), PARSE_SNIPPET_LIMIT),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn transport_errors_become_connection_errors() {
        let err: ScraperError = TransportError::Timeout(Duration::from_secs(30)).into();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.is_retryable());
    }
}
