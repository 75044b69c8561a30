//! Pluggable CAPTCHA solving.
//!
//! The portals guard login forms with reCAPTCHA or hCaptcha widgets. Solving
//! is delegated to an external service behind [`CaptchaSolver`]; the crate
//! ships no solving algorithm.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Widget family found on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptchaKind {
    ReCaptcha,
    HCaptcha,
}

impl CaptchaKind {
    /// Form field the portal expects the token in.
    pub fn response_field(self) -> &'static str {
        match self {
            CaptchaKind::ReCaptcha => "g-recaptcha-response",
            CaptchaKind::HCaptcha => "h-captcha-response",
        }
    }
}

/// Details of the widget that must be solved.
#[derive(Debug, Clone)]
pub struct CaptchaTask {
    pub kind: CaptchaKind,
    pub site_key: String,
    pub page_url: Url,
    pub data: HashMap<String, String>,
}

impl CaptchaTask {
    pub fn new(kind: CaptchaKind, site_key: impl Into<String>, page_url: Url) -> Self {
        Self {
            kind,
            site_key: site_key.into(),
            page_url,
            data: HashMap::new(),
        }
    }

    pub fn insert_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Resolved captcha token.
#[derive(Debug, Clone)]
pub struct CaptchaSolution {
    pub token: String,
    pub expires_in: Option<Duration>,
}

impl CaptchaSolution {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_in: None,
        }
    }

    pub fn with_expiry(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }
}

pub type CaptchaResult = Result<CaptchaSolution, CaptchaError>;

/// Implemented by adapters for external solving services.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, task: &CaptchaTask) -> CaptchaResult;
}

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha solver misconfigured: {0}")]
    Configuration(String),
    #[error("captcha solver request failed: {0}")]
    Provider(String),
    #[error("captcha solving timed out after {0:?}")]
    Timeout(Duration),
}
