//! Reqwest-based implementation of the `HttpTransport` trait.
//!
//! Keeps one `reqwest::Client` per egress proxy. Redirects are disabled so
//! the dispatcher can absorb `Set-Cookie` headers from every hop.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, redirect::Policy};
use tokio::sync::Mutex;

use super::{HttpTransport, TransportError, TransportRequest, TransportResponse};
use crate::auth::CertificateBundle;

/// Reqwest-backed transport, optionally presenting a client certificate.
pub struct ReqwestTransport {
    user_agent: String,
    certificate: Option<CertificateBundle>,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            certificate: None,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Presents `bundle` during the TLS handshake (mutual TLS).
    pub fn with_certificate(mut self, bundle: CertificateBundle) -> Self {
        self.certificate = Some(bundle);
        self
    }

    async fn client(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let mut guard = self.clients.lock().await;
        let key = proxy.map(str::to_string);
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .redirect(Policy::none())
            .user_agent(self.user_agent.as_str());

        if let Some(endpoint) = proxy {
            let proxy = reqwest::Proxy::all(endpoint)
                .map_err(|err| TransportError::Connect(format!("invalid proxy {endpoint}: {err}")))?;
            builder = builder.proxy(proxy);
        }

        if let Some(ref bundle) = self.certificate {
            builder = apply_identity(builder, bundle)?;
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::Tls(err.to_string()))?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.client(request.proxy.as_deref()).await?;

        let mut builder = client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(ref fields) = request.form {
            builder = builder.form(fields);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|err| map_error(err, request.timeout))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| map_error(err, request.timeout))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

fn map_error(err: reqwest::Error, timeout: Option<std::time::Duration>) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout.unwrap_or_default())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[cfg(feature = "certificate")]
fn apply_identity(
    builder: ClientBuilder,
    bundle: &CertificateBundle,
) -> Result<ClientBuilder, TransportError> {
    let identity = bundle
        .identity()
        .map_err(|err| TransportError::Tls(err.to_string()))?;
    Ok(builder.identity(identity))
}

#[cfg(not(feature = "certificate"))]
fn apply_identity(
    _builder: ClientBuilder,
    _bundle: &CertificateBundle,
) -> Result<ClientBuilder, TransportError> {
    Err(TransportError::Tls(
        "client certificates require the `certificate` feature".into(),
    ))
}
