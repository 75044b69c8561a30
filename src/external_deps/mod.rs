//! Integrations that rely on third-party services.

pub mod captcha;

pub use captcha::{CaptchaError, CaptchaKind, CaptchaSolution, CaptchaSolver, CaptchaTask};
