//! Login outcome detection from the portal's response.

use crate::tribunais::SistemaOrigem;
use crate::utils::dobrar_texto;

/// Classification of a login response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    /// Carries the negative marker that matched.
    Failure(String),
    Ambiguous,
}

/// Two independent marker sets plus session-cookie patterns.
///
/// Negative markers win over positive ones. Matching ignores case and
/// accents; cookie patterns are case-insensitive substrings of cookie names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginMarkers {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub session_cookie_patterns: Vec<String>,
}

const POSITIVE: &[&str] = &[
    "painel",
    "sair",
    "bem-vindo",
    "bem vindo",
    "logout",
    "meus processos",
];

const NEGATIVE: &[&str] = &[
    "usuario ou senha invalid",
    "login ou senha invalid",
    "cpf ou senha invalid",
    "senha incorreta",
    "senha invalida",
    "credenciais invalidas",
    "usuario bloqueado",
    "acesso negado",
];

impl LoginMarkers {
    pub fn new<P, N, C>(positive: P, negative: N, session_cookie_patterns: C) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            positive: positive.into_iter().map(Into::into).collect(),
            negative: negative.into_iter().map(Into::into).collect(),
            session_cookie_patterns: session_cookie_patterns
                .into_iter()
                .map(Into::into)
                .collect(),
        }
    }

    /// Default markers for a portal family.
    pub fn for_sistema(sistema: SistemaOrigem) -> Self {
        let cookies: &[&str] = match sistema {
            SistemaOrigem::Projudi => &["projudi_sessao", "JSESSIONIDSSO"],
            SistemaOrigem::Esaj => &["CASTGC", "JSESSIONIDSSO"],
            SistemaOrigem::Pje => &["KEYCLOAK_SESSION", "PJE-TOKEN", "JSESSIONIDSSO"],
        };
        Self::new(
            POSITIVE.iter().copied(),
            NEGATIVE.iter().copied(),
            cookies.iter().copied(),
        )
    }

    /// `new_cookies` are the cookie names set during the login exchange.
    pub fn classify(&self, body: &str, new_cookies: &[String]) -> AuthOutcome {
        let folded = dobrar_texto(body);

        if let Some(marker) = self
            .negative
            .iter()
            .find(|marker| folded.contains(&dobrar_texto(marker)))
        {
            return AuthOutcome::Failure(marker.clone());
        }

        if self
            .positive
            .iter()
            .any(|marker| folded.contains(&dobrar_texto(marker)))
        {
            return AuthOutcome::Success;
        }

        let cookie_match = new_cookies.iter().any(|name| {
            let name = name.to_ascii_lowercase();
            self.session_cookie_patterns
                .iter()
                .any(|pattern| name.contains(&pattern.to_ascii_lowercase()))
        });
        if cookie_match {
            AuthOutcome::Success
        } else {
            AuthOutcome::Ambiguous
        }
    }
}

impl Default for LoginMarkers {
    fn default() -> Self {
        Self::for_sistema(SistemaOrigem::Projudi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_marker_means_success() {
        let markers = LoginMarkers::default();
        assert_eq!(
            markers.classify("<h1>Bem-Vindo, Fulano</h1>", &[]),
            AuthOutcome::Success
        );
    }

    #[test]
    fn negative_markers_take_precedence() {
        let markers = LoginMarkers::default();
        let body = "<div>Usuário ou senha inválidos</div><a href='/'>Sair</a>";
        assert_eq!(
            markers.classify(body, &["JSESSIONIDSSO".into()]),
            AuthOutcome::Failure("usuario ou senha invalid".into())
        );
    }

    #[test]
    fn session_cookie_alone_is_enough() {
        let markers = LoginMarkers::for_sistema(SistemaOrigem::Esaj);
        assert_eq!(
            markers.classify("<html>redirecting</html>", &["castgc".into()]),
            AuthOutcome::Success
        );
    }

    #[test]
    fn neither_marker_is_ambiguous() {
        let markers = LoginMarkers::default();
        assert_eq!(
            markers.classify("<html>carregando</html>", &["JSESSIONID".into()]),
            AuthOutcome::Ambiguous
        );
    }
}
