//! Page classification ahead of parsing.
//!
//! Patterns run over accent- and case-folded HTML, so they are written
//! without diacritics.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::{dobrar_texto, somente_digitos};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Processo,
    NaoEncontrado,
    Captcha,
    SessaoExpirada,
    LoginRequerido,
    Desconhecido,
}

static SEALED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"segredo\s+de\s+justica|processo\s+sigiloso|tramita\s+em\s+sigilo")
        .expect("invalid sealed-case regex")
});

static NOT_FOUND_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"nenhum\s+processo\s+(foi\s+)?encontrado|processo\s+nao\s+(foi\s+)?encontrado|nao\s+(foram\s+)?encontrad[oa]s?\s+(processos|resultados|registros)|nenhum\s+(registro|resultado)\s+encontrado|nao\s+existem\s+informacoes\s+disponiveis",
    )
    .expect("invalid not-found regex")
});

static CAPTCHA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"g-recaptcha|h-captcha|data-sitekey|captcha|digite\s+os\s+caracteres")
        .expect("invalid captcha regex")
});

static SESSION_EXPIRED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"sessao\s+(expirada|encerrada|invalida)|sua\s+sessao\s+(expirou|foi\s+encerrada)|efetue\s+(o\s+)?login\s+novamente|tempo\s+de\s+sessao\s+esgotado",
    )
    .expect("invalid session-expired regex")
});

static PASSWORD_INPUT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"type\s*=\s*["']?password"#).expect("invalid password-input regex")
});

static LABEL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(classe|assunto|distribui(do|cao)|comarca|vara|orgao\s+julgador|valor\s+da\s+causa|polo\s+(ativo|passivo))\b")
        .expect("invalid process-label regex")
});

/// Tells process pages apart from the portals' interstitials.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageClassifier;

impl PageClassifier {
    pub fn new() -> Self {
        Self
    }

    /// `numero` is the canonical number that was requested.
    pub fn classify(&self, html: &str, numero: &str) -> PageKind {
        let folded = dobrar_texto(html);
        let has_numero = html.contains(numero)
            || somente_digitos(html).contains(&somente_digitos(numero));
        let has_labels = LABEL_PATTERN.is_match(&folded);

        if SEALED_PATTERN.is_match(&folded) {
            return PageKind::Processo;
        }
        // Empty sub-grids on a real process page say "nenhum registro
        // encontrado" too; the marker only counts without the process itself.
        if NOT_FOUND_PATTERN.is_match(&folded) && !(has_numero && has_labels) {
            return PageKind::NaoEncontrado;
        }
        if SESSION_EXPIRED_PATTERN.is_match(&folded) {
            return PageKind::SessaoExpirada;
        }
        if PASSWORD_INPUT_PATTERN.is_match(&folded) && !has_numero {
            return PageKind::LoginRequerido;
        }
        if CAPTCHA_PATTERN.is_match(&folded) && !has_numero {
            return PageKind::Captcha;
        }
        if has_numero || has_labels {
            return PageKind::Processo;
        }
        PageKind::Desconhecido
    }

    /// Whether the page flags a sealed case.
    pub fn is_sealed(&self, html: &str) -> bool {
        SEALED_PATTERN.is_match(&dobrar_texto(html))
    }
}
