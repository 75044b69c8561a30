//! Credential sources injected into the client.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::auth::{CertificateBundle, Credentials};
use crate::error::ScraperResult;

/// Supplies credentials for a tribunal on demand. `Ok(None)` means the
/// provider has nothing for that tribunal.
pub trait SecretProvider: Send + Sync {
    fn credentials(&self, tribunal: &str) -> ScraperResult<Option<Credentials>>;
}

/// Fixed credentials, optionally per tribunal code.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretProvider {
    default: Option<Credentials>,
    per_tribunal: HashMap<String, Credentials>,
}

impl StaticSecretProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            default: Some(credentials),
            per_tribunal: HashMap::new(),
        }
    }

    pub fn with_tribunal(mut self, tribunal: impl AsRef<str>, credentials: Credentials) -> Self {
        self.per_tribunal
            .insert(tribunal.as_ref().to_uppercase(), credentials);
        self
    }
}

impl SecretProvider for StaticSecretProvider {
    fn credentials(&self, tribunal: &str) -> ScraperResult<Option<Credentials>> {
        Ok(self
            .per_tribunal
            .get(&tribunal.to_uppercase())
            .or(self.default.as_ref())
            .cloned())
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads `{PREFIX}_{TRIBUNAL}_USUARIO` / `_SENHA` first, then the
/// tribunal-less `{PREFIX}_USUARIO` / `_SENHA`. A `_CERTIFICADO` path (with
/// `_CERTIFICADO_SENHA`) takes precedence over user and password.
pub struct EnvSecretProvider {
    prefix: String,
    lookup: Lookup,
}

impl EnvSecretProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_lookup(prefix, |key| std::env::var(key).ok())
    }

    pub fn with_lookup<F>(prefix: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            prefix: prefix.into(),
            lookup: Box::new(lookup),
        }
    }

    fn var(&self, scope: Option<&str>, name: &str) -> Option<String> {
        let key = match scope {
            Some(tribunal) => format!("{}_{}_{name}", self.prefix, tribunal.to_uppercase()),
            None => format!("{}_{name}", self.prefix),
        };
        (self.lookup)(&key).filter(|value| !value.trim().is_empty())
    }

    fn scoped(&self, scope: Option<&str>) -> ScraperResult<Option<Credentials>> {
        if let Some(path) = self.var(scope, "CERTIFICADO") {
            let senha = self.var(scope, "CERTIFICADO_SENHA").unwrap_or_default();
            let bundle = CertificateBundle::from_file(PathBuf::from(path), senha)?;
            return Ok(Some(Credentials::Certificado(bundle)));
        }
        match (self.var(scope, "USUARIO"), self.var(scope, "SENHA")) {
            (Some(usuario), Some(senha)) => Ok(Some(Credentials::senha(usuario, senha))),
            _ => Ok(None),
        }
    }
}

impl SecretProvider for EnvSecretProvider {
    fn credentials(&self, tribunal: &str) -> ScraperResult<Option<Credentials>> {
        match self.scoped(Some(tribunal))? {
            Some(credentials) => Ok(Some(credentials)),
            None => self.scoped(None),
        }
    }
}

impl fmt::Debug for EnvSecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSecretProvider")
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMethod;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> EnvSecretProvider {
        EnvSecretProvider::with_lookup("EJUSTICA", move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
    }

    #[test]
    fn static_provider_prefers_tribunal_entry() {
        let provider = StaticSecretProvider::new(Credentials::senha("52998224725", "a"))
            .with_tribunal("tjsp", Credentials::senha("12345678909", "b"));
        match provider.credentials("TJSP").unwrap() {
            Some(Credentials::Senha { usuario, .. }) => assert_eq!(usuario, "12345678909"),
            other => panic!("unexpected credentials: {other:?}"),
        }
        match provider.credentials("TJGO").unwrap() {
            Some(Credentials::Senha { usuario, .. }) => assert_eq!(usuario, "52998224725"),
            other => panic!("unexpected credentials: {other:?}"),
        }
    }

    #[test]
    fn env_provider_falls_back_to_unscoped_pair() {
        let provider = env(&[
            ("EJUSTICA_TJGO_USUARIO", "52998224725"),
            ("EJUSTICA_TJGO_SENHA", "segredo"),
            ("EJUSTICA_USUARIO", "12345678909"),
            ("EJUSTICA_SENHA", "outro"),
        ]);
        match provider.credentials("tjgo").unwrap() {
            Some(Credentials::Senha { usuario, senha }) => {
                assert_eq!(usuario, "52998224725");
                assert_eq!(senha, "segredo");
            }
            other => panic!("unexpected credentials: {other:?}"),
        }
        let fallback = provider.credentials("TRF1").unwrap().unwrap();
        assert_eq!(fallback.method(), AuthMethod::Form);
    }

    #[test]
    fn env_provider_without_pair_yields_none() {
        let provider = env(&[("EJUSTICA_USUARIO", "52998224725")]);
        assert!(provider.credentials("TJGO").unwrap().is_none());
    }

    #[test]
    fn env_certificate_path_must_exist() {
        let provider = env(&[("EJUSTICA_TRF1_CERTIFICADO", "/nonexistent/cert.p12")]);
        assert!(provider.credentials("TRF1").is_err());
    }
}
