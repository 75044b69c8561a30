//! Sends requests on behalf of a session.
//!
//! The dispatcher picks an egress proxy, applies the session's cookies and
//! user agent, follows redirects by hand so cookies from every hop land in
//! the session, and emits request/response events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use http::Method;
use http::header::{COOKIE, HeaderValue, REFERER, USER_AGENT};
use url::Url;

use super::{HttpTransport, TransportRequest, TransportResponse};
use crate::error::{ScraperError, ScraperResult};
use crate::modules::events::{EventDispatcher, RequestEvent, ResponseEvent, ScraperEvent};
use crate::modules::proxy::ProxyManager;
use crate::modules::session::SessionCache;

const DEFAULT_MAX_REDIRECTS: usize = 5;

pub struct Dispatcher {
    transport: Arc<dyn HttpTransport>,
    proxies: Option<ProxyManager>,
    events: Arc<EventDispatcher>,
    timeout: Duration,
    max_redirects: usize,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>, events: Arc<EventDispatcher>) -> Self {
        Self {
            transport,
            proxies: None,
            events,
            timeout: Duration::from_secs(30),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn with_proxies(mut self, proxies: Option<ProxyManager>) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Same settings over another transport (certificate logins need their
    /// own TLS identity).
    pub fn with_transport(&self, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            proxies: self.proxies.clone(),
            events: self.events.clone(),
            timeout: self.timeout,
            max_redirects: self.max_redirects,
        }
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// Sends `request`, following up to `max_redirects` hops. Every hop's
    /// `Set-Cookie` headers are merged into `session`.
    pub async fn send(
        &self,
        target: &str,
        request: TransportRequest,
        session: &mut SessionCache,
    ) -> ScraperResult<TransportResponse> {
        let mut current = request;
        let mut hops = 0;

        loop {
            let template = current.clone();
            let response = self.send_once(target, current, session).await?;
            session.absorb_cookies(&response);

            if !response.is_redirect() || response.location().is_none() {
                return Ok(response);
            }
            if hops >= self.max_redirects {
                return Err(ScraperError::Connection(format!(
                    "too many redirects starting at {}",
                    template.url
                )));
            }
            hops += 1;

            let next_url = resolve_redirect(&response, &template.url);
            let mut next = if matches!(response.status, 307 | 308) {
                let mut preserved = template.clone();
                preserved.url = next_url;
                preserved
            } else {
                let mut follow = TransportRequest::get(next_url);
                follow.headers = template.headers.clone();
                follow.timeout = template.timeout;
                follow
            };
            if let Ok(referer) = HeaderValue::from_str(response.url.as_str()) {
                next.headers.insert(REFERER, referer);
            }
            current = next;
        }
    }

    async fn send_once(
        &self,
        target: &str,
        mut request: TransportRequest,
        session: &SessionCache,
    ) -> ScraperResult<TransportResponse> {
        let proxy = self.proxies.as_ref().and_then(ProxyManager::get_proxy);
        request.proxy = proxy.clone();
        request.timeout = request.timeout.or(Some(self.timeout));

        request.headers.remove(COOKIE);
        if let Some(cookies) = session.cookie_header() {
            let value = HeaderValue::from_str(&cookies)
                .map_err(|_| ScraperError::Validation("session cookie is not a valid header".into()))?;
            request.headers.insert(COOKIE, value);
        }
        if !request.headers.contains_key(USER_AGENT)
            && let Ok(agent) = HeaderValue::from_str(&session.user_agent)
        {
            request.headers.insert(USER_AGENT, agent);
        }

        let method: Method = request.method.clone();
        let url: Url = request.url.clone();
        self.events.dispatch(ScraperEvent::Request(RequestEvent {
            target: target.to_string(),
            method: method.clone(),
            url: url.clone(),
            proxy: proxy.clone(),
            timestamp: Utc::now(),
        }));

        let started = Instant::now();
        let result = self.transport.send(request).await;

        match result {
            Ok(response) => {
                if let (Some(pool), Some(endpoint)) = (&self.proxies, &proxy) {
                    if response.status < 500 {
                        pool.report_success(endpoint);
                    } else {
                        pool.report_failure(endpoint, format!("HTTP {}", response.status));
                    }
                }
                self.events.dispatch(ScraperEvent::Response(ResponseEvent {
                    target: target.to_string(),
                    method,
                    url,
                    status: response.status,
                    latency: started.elapsed(),
                    timestamp: Utc::now(),
                }));
                Ok(response)
            }
            Err(err) => {
                if let (Some(pool), Some(endpoint)) = (&self.proxies, &proxy) {
                    pool.report_failure(endpoint, err.to_string());
                }
                Err(err.into())
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("proxies", &self.proxies)
            .field("timeout", &self.timeout)
            .field("max_redirects", &self.max_redirects)
            .finish()
    }
}

/// Maps throttling and server failures to their retryable errors.
pub fn ensure_transport_success(response: TransportResponse) -> ScraperResult<TransportResponse> {
    match response.status {
        429 => Err(ScraperError::RateLimit {
            retry_after: response.retry_after(),
        }),
        status @ 500..=599 => Err(ScraperError::Server { status }),
        _ => Ok(response),
    }
}

fn resolve_redirect(response: &TransportResponse, original_url: &Url) -> Url {
    if let Some(location) = response.location() {
        if let Ok(absolute) = Url::parse(location)
            && absolute.has_host()
        {
            return absolute;
        }

        if let Ok(joined) = response.url.join(location) {
            return joined;
        }
    }

    original_url.clone()
}
