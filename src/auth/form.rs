//! Username/password login through the portal's HTML form.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{AuthContext, AuthMethod, Authenticator, Credentials, concluir_login};
use crate::core::{TransportRequest, ensure_transport_success};
use crate::error::{ScraperError, ScraperResult};
use crate::external_deps::{CaptchaKind, CaptchaTask};
use crate::modules::session::SessionCache;
use crate::tribunais::SistemaOrigem;
use crate::utils::normalizar_cpf;

static FORM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("form").expect("invalid form selector"));
static INPUT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input").expect("invalid input selector"));
static CAPTCHA_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-sitekey]").expect("invalid captcha selector"));

/// Field names used when the login page has no recognisable form.
fn default_fields(sistema: SistemaOrigem) -> (&'static str, &'static str) {
    match sistema {
        SistemaOrigem::Projudi => ("login", "senha"),
        SistemaOrigem::Esaj | SistemaOrigem::Pje => ("username", "password"),
    }
}

/// What was learned from the login page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoginForm {
    action: Url,
    user_field: String,
    password_field: String,
    hidden: Vec<(String, String)>,
    captcha: Option<(CaptchaKind, String)>,
}

impl LoginForm {
    fn discover(html: &str, page_url: &Url, sistema: SistemaOrigem) -> Self {
        let document = Html::parse_document(html);
        let captcha = detect_captcha(&document);

        let form = document.select(&FORM_SELECTOR).find(|form| {
            form.select(&INPUT_SELECTOR)
                .any(|input| input_type(&input) == "password")
        });

        let (default_user, default_password) = default_fields(sistema);
        let Some(form) = form else {
            return Self {
                action: page_url.clone(),
                user_field: default_user.to_string(),
                password_field: default_password.to_string(),
                hidden: Vec::new(),
                captcha,
            };
        };

        let action = form
            .value()
            .attr("action")
            .map(str::trim)
            .filter(|action| !action.is_empty() && !action.starts_with('#'))
            .and_then(|action| page_url.join(action).ok())
            .unwrap_or_else(|| page_url.clone());

        let mut user_field = None;
        let mut password_field = None;
        let mut hidden = Vec::new();
        for input in form.select(&INPUT_SELECTOR) {
            let Some(name) = input.value().attr("name").filter(|name| !name.is_empty()) else {
                continue;
            };
            match input_type(&input).as_str() {
                "password" if password_field.is_none() => password_field = Some(name.to_string()),
                "hidden" => hidden.push((
                    name.to_string(),
                    input.value().attr("value").unwrap_or_default().to_string(),
                )),
                "text" | "email" | "tel" | "number" if user_field.is_none() => {
                    user_field = Some(name.to_string())
                }
                _ => {}
            }
        }

        Self {
            action,
            user_field: user_field.unwrap_or_else(|| default_user.to_string()),
            password_field: password_field.unwrap_or_else(|| default_password.to_string()),
            hidden,
            captcha,
        }
    }
}

fn input_type(input: &ElementRef<'_>) -> String {
    input
        .value()
        .attr("type")
        .unwrap_or("text")
        .trim()
        .to_ascii_lowercase()
}

fn detect_captcha(document: &Html) -> Option<(CaptchaKind, String)> {
    let widget = document.select(&CAPTCHA_SELECTOR).next()?;
    let site_key = widget.value().attr("data-sitekey")?.trim().to_string();
    let kind = if widget.value().classes().any(|class| class.contains("h-captcha")) {
        CaptchaKind::HCaptcha
    } else {
        CaptchaKind::ReCaptcha
    };
    Some((kind, site_key))
}

/// Logs in by GETting the login page, then POSTing its form with the
/// credentials filled in.
#[derive(Debug, Clone, Default)]
pub struct FormAuthenticator;

impl FormAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Authenticator for FormAuthenticator {
    fn method(&self) -> AuthMethod {
        AuthMethod::Form
    }

    async fn authenticate(
        &self,
        ctx: &AuthContext<'_>,
        credentials: &Credentials,
        _session: &SessionCache,
    ) -> ScraperResult<SessionCache> {
        let Credentials::Senha { usuario, senha } = credentials else {
            return Err(ScraperError::Validation(
                "form login requires usuario/senha credentials".into(),
            ));
        };
        if usuario.trim().is_empty() || senha.is_empty() {
            return Err(ScraperError::Validation("usuario and senha must not be empty".into()));
        }

        let target = ctx.tribunal.codigo.as_str();
        let mut working = SessionCache::new(ctx.user_agent, ctx.session_ttl);

        let login_url = ctx.tribunal.login_url()?;
        let page = ctx
            .dispatcher
            .send(target, TransportRequest::get(login_url), &mut working)
            .await?;
        let page = ensure_transport_success(page)?;
        let form = LoginForm::discover(&page.text(), &page.url, ctx.tribunal.sistema);
        log::debug!(
            "[{target}] login form posts to {} ({} hidden field(s))",
            form.action,
            form.hidden.len()
        );

        let usuario = normalizar_cpf(usuario).unwrap_or_else(|| usuario.trim().to_string());
        let mut fields = form.hidden.clone();
        fields.push((form.user_field.clone(), usuario));
        fields.push((form.password_field.clone(), senha.clone()));

        if let Some((kind, site_key)) = form.captcha {
            let Some(solver) = ctx.captcha else {
                return Err(ScraperError::Captcha(format!(
                    "{target} login page requires a captcha and no solver is configured"
                )));
            };
            let task = CaptchaTask::new(kind, site_key, page.url.clone());
            let solution = solver
                .solve(&task)
                .await
                .map_err(|err| ScraperError::Captcha(format!("{}: {err}", solver.name())))?;
            fields.push((kind.response_field().to_string(), solution.token));
        }

        let before = working.cookies.clone();
        let response = ctx
            .dispatcher
            .send(target, TransportRequest::post_form(form.action, fields), &mut working)
            .await?;
        let response = ensure_transport_success(response)?;

        concluir_login(ctx, &before, working, &response)
    }
}
