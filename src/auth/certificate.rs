//! Certificate (PKCS12) login over mutual TLS.
//!
//! Needs the `certificate` cargo feature (on by default); without it every
//! attempt fails with [`ScraperError::CertificateUnavailable`]. A bundle is
//! only checked by parsing it; an expired certificate surfaces as a TLS
//! failure during the handshake.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::{AuthContext, AuthMethod, Authenticator, Credentials, concluir_login};
use crate::core::{HttpTransport, TransportRequest, ensure_transport_success};
use crate::error::{ScraperError, ScraperResult};
use crate::modules::session::SessionCache;

/// DER-encoded PKCS12 archive plus its password.
#[derive(Clone)]
pub struct CertificateBundle {
    der: Vec<u8>,
    password: String,
}

impl CertificateBundle {
    pub fn from_der(der: impl Into<Vec<u8>>, password: impl Into<String>) -> Self {
        Self {
            der: der.into(),
            password: password.into(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>, password: impl Into<String>) -> ScraperResult<Self> {
        let path = path.as_ref();
        let der = std::fs::read(path).map_err(|err| {
            ScraperError::Validation(format!("cannot read certificate {}: {err}", path.display()))
        })?;
        Ok(Self::from_der(der, password))
    }

    /// Parses the archive into a TLS client identity.
    #[cfg(feature = "certificate")]
    pub fn identity(&self) -> ScraperResult<reqwest::Identity> {
        reqwest::Identity::from_pkcs12_der(&self.der, &self.password)
            .map_err(|err| ScraperError::Authentication(format!("invalid PKCS12 certificate: {err}")))
    }
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("bytes", &self.der.len())
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authenticates by presenting a client certificate to the portal's
/// certificate endpoint.
#[derive(Default, Clone)]
pub struct CertificateAuthenticator {
    transport: Option<Arc<dyn HttpTransport>>,
}

impl CertificateAuthenticator {
    pub fn new() -> Self {
        Self { transport: None }
    }

    /// Uses `transport` instead of building a TLS client from the bundle.
    /// The transport is then responsible for presenting the certificate.
    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    fn transport_for(
        &self,
        bundle: &CertificateBundle,
        user_agent: &str,
    ) -> ScraperResult<Arc<dyn HttpTransport>> {
        if let Some(ref transport) = self.transport {
            return Ok(transport.clone());
        }
        certificate_transport(bundle, user_agent)
    }
}

#[cfg(feature = "certificate")]
fn certificate_transport(
    bundle: &CertificateBundle,
    user_agent: &str,
) -> ScraperResult<Arc<dyn HttpTransport>> {
    bundle.identity()?;
    Ok(Arc::new(
        crate::core::ReqwestTransport::new(user_agent).with_certificate(bundle.clone()),
    ))
}

#[cfg(not(feature = "certificate"))]
fn certificate_transport(
    _bundle: &CertificateBundle,
    _user_agent: &str,
) -> ScraperResult<Arc<dyn HttpTransport>> {
    Err(ScraperError::CertificateUnavailable(
        "crate built without the `certificate` feature".into(),
    ))
}

impl fmt::Debug for CertificateAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthenticator")
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

#[async_trait]
impl Authenticator for CertificateAuthenticator {
    fn method(&self) -> AuthMethod {
        AuthMethod::Certificate
    }

    async fn authenticate(
        &self,
        ctx: &AuthContext<'_>,
        credentials: &Credentials,
        _session: &SessionCache,
    ) -> ScraperResult<SessionCache> {
        let Credentials::Certificado(bundle) = credentials else {
            return Err(ScraperError::Validation(
                "certificate login requires certificate credentials".into(),
            ));
        };

        let transport = self.transport_for(bundle, ctx.user_agent)?;
        let dispatcher = ctx.dispatcher.with_transport(transport);
        let target = ctx.tribunal.codigo.as_str();

        let mut working = SessionCache::new(ctx.user_agent, ctx.session_ttl);
        let before = working.cookies.clone();
        let response = dispatcher
            .send(
                target,
                TransportRequest::get(ctx.tribunal.certificado_url()?),
                &mut working,
            )
            .await?;
        let response = ensure_transport_success(response)?;

        concluir_login(ctx, &before, working, &response)
    }
}
