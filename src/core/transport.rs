//! Transport abstraction used by authenticators and the facade.
//!
//! Implementations perform exactly one HTTP exchange: no redirect following,
//! no cookie jar. Session state is owned by the caller and applied per
//! request so it can be inspected, expired and replaced explicitly.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue, LOCATION, RETRY_AFTER, SET_COOKIE};
use http::Method;
use thiserror::Error;
use url::Url;

/// Contract that abstracts the underlying HTTP stack.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub form: Option<Vec<(String, String)>>,
    pub proxy: Option<String>,
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            form: None,
            proxy: None,
            timeout: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post_form(url: Url, fields: Vec<(String, String)>) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.form = Some(fields);
        request
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Minimal response representation returned by the transport abstraction.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
}

impl TransportResponse {
    pub fn new(status: u16, url: Url) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            url,
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    /// Lossy UTF-8 view of the body. Portals still serve ISO-8859-1 pages
    /// now and then; replacement characters are preferable to failing.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// `(name, value)` pairs from every `Set-Cookie` header.
    pub fn set_cookies(&self) -> Vec<(String, String)> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|raw| {
                let pair = raw.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect()
    }

    /// `Retry-After` as either delta-seconds or an HTTP date. Values beyond
    /// what a `Duration` holds saturate to `Duration::MAX`.
    pub fn retry_after(&self) -> Option<Duration> {
        let raw = self.headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
        if let Ok(seconds) = raw.parse::<f64>()
            && seconds.is_finite()
            && seconds >= 0.0
        {
            return Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX));
        }

        DateTime::parse_from_rfc2822(raw)
            .ok()
            .and_then(|date| (date.with_timezone(&Utc) - Utc::now()).to_std().ok())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("tls setup failed: {0}")]
    Tls(String),
    #[error("http transport error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> TransportResponse {
        TransportResponse::new(200, Url::parse("https://projudi.tjgo.jus.br/").unwrap())
    }

    #[test]
    fn extracts_set_cookie_pairs() {
        let resp = response()
            .with_header(SET_COOKIE, HeaderValue::from_static("JSESSIONID=abc123; Path=/; HttpOnly"))
            .with_header(SET_COOKIE, HeaderValue::from_static("lang=pt-BR"))
            .with_header(SET_COOKIE, HeaderValue::from_static("=broken"));
        assert_eq!(
            resp.set_cookies(),
            vec![
                ("JSESSIONID".to_string(), "abc123".to_string()),
                ("lang".to_string(), "pt-BR".to_string()),
            ]
        );
    }

    #[test]
    fn parses_retry_after_seconds() {
        let resp = response().with_header(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(resp.retry_after(), Some(Duration::from_secs(120)));
        assert_eq!(response().retry_after(), None);
    }

    #[test]
    fn oversized_retry_after_saturates() {
        let resp = response().with_header(RETRY_AFTER, HeaderValue::from_static("1e30"));
        assert_eq!(resp.retry_after(), Some(Duration::MAX));
        let negative = response().with_header(RETRY_AFTER, HeaderValue::from_static("-5"));
        assert_eq!(negative.retry_after(), None);
    }

    #[test]
    fn detects_redirects() {
        let mut resp = response().with_header(LOCATION, HeaderValue::from_static("/painel"));
        resp.status = 302;
        assert!(resp.is_redirect());
        assert_eq!(resp.location(), Some("/painel"));
    }
}
