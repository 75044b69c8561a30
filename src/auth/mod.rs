//! Authentication strategies.
//!
//! Form login (CPF/senha) and certificate login (PKCS12, mutual TLS) share
//! the [`Authenticator`] trait; the client picks one from
//! [`AuthMethod`] in its configuration.

mod certificate;
mod form;
mod markers;

pub use certificate::{CertificateAuthenticator, CertificateBundle};
pub use form::FormAuthenticator;
pub use markers::{AuthOutcome, LoginMarkers};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Dispatcher, TransportResponse};
use crate::error::{ScraperError, ScraperResult};
use crate::external_deps::CaptchaSolver;
use crate::modules::session::SessionCache;
use crate::tribunais::Tribunal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Form,
    Certificate,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Form => f.write_str("form"),
            AuthMethod::Certificate => f.write_str("certificate"),
        }
    }
}

/// Secrets handed to an authenticator.
#[derive(Clone)]
pub enum Credentials {
    Senha { usuario: String, senha: String },
    Certificado(CertificateBundle),
}

impl Credentials {
    pub fn senha(usuario: impl Into<String>, senha: impl Into<String>) -> Self {
        Credentials::Senha {
            usuario: usuario.into(),
            senha: senha.into(),
        }
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Credentials::Senha { .. } => AuthMethod::Form,
            Credentials::Certificado(_) => AuthMethod::Certificate,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Senha { usuario, .. } => f
                .debug_struct("Senha")
                .field("usuario", usuario)
                .field("senha", &"<redacted>")
                .finish(),
            Credentials::Certificado(bundle) => {
                f.debug_tuple("Certificado").field(bundle).finish()
            }
        }
    }
}

/// Everything an authenticator needs besides the credentials.
pub struct AuthContext<'a> {
    pub dispatcher: &'a Dispatcher,
    pub tribunal: &'a Tribunal,
    pub markers: &'a LoginMarkers,
    pub user_agent: &'a str,
    pub session_ttl: Duration,
    pub captcha: Option<&'a dyn CaptchaSolver>,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn method(&self) -> AuthMethod;

    /// Logs in and returns a fresh authenticated session. `session` is the
    /// current (possibly stale) cache; it is never mutated.
    async fn authenticate(
        &self,
        ctx: &AuthContext<'_>,
        credentials: &Credentials,
        session: &SessionCache,
    ) -> ScraperResult<SessionCache>;
}

/// Classifies the final login response and builds the authenticated
/// session from the cookies gathered during the exchange.
pub(crate) fn concluir_login(
    ctx: &AuthContext<'_>,
    before: &BTreeMap<String, String>,
    working: SessionCache,
    response: &TransportResponse,
) -> ScraperResult<SessionCache> {
    let new_cookies: Vec<String> = working
        .cookies
        .iter()
        .filter(|(name, value)| before.get(*name) != Some(*value))
        .map(|(name, _)| name.clone())
        .collect();

    match ctx.markers.classify(&response.text(), &new_cookies) {
        AuthOutcome::Success => Ok(SessionCache::authenticated(
            ctx.user_agent,
            ctx.session_ttl,
            working.cookies,
        )),
        AuthOutcome::Failure(marker) => Err(ScraperError::Authentication(format!(
            "{} rejected the credentials ('{marker}')",
            ctx.tribunal.codigo
        ))),
        AuthOutcome::Ambiguous => Err(ScraperError::AuthenticationAmbiguous(format!(
            "no login marker or session cookie in the response from {}",
            response.url
        ))),
    }
}
