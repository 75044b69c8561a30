//! Client configuration.
//!
//! [`ClientConfig`] is plain data passed to the client at construction.
//! It loads from JSON or from `EJUSTICA_*` environment variables and is
//! validated once, in [`ClientConfigBuilder::build`] / [`ClientConfig::validate`].

mod secrets;

pub use secrets::{EnvSecretProvider, SecretProvider, StaticSecretProvider};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::auth::AuthMethod;

/// Prefix of the environment variables read by [`ClientConfig::from_env`].
pub const ENV_PREFIX: &str = "EJUSTICA";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid_value(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Durations are written as (fractional) seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Settings of one client instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Replaces the routing table's base URL for every tribunal.
    pub base_url: Option<Url>,
    /// Tribunal code used when the caller does not pass one.
    pub tribunal: Option<String>,
    #[serde(with = "secs")]
    pub timeout: Duration,
    pub max_retries: u32,
    /// Minimum spacing between two upstream calls.
    #[serde(with = "secs")]
    pub rate_limit: Duration,
    pub proxies: Vec<String>,
    pub enable_rotation: bool,
    pub failure_threshold: u32,
    #[serde(with = "secs")]
    pub recovery_timeout: Duration,
    #[serde(with = "secs")]
    pub backoff_base: Duration,
    #[serde(with = "secs")]
    pub max_backoff: Duration,
    #[serde(with = "secs")]
    pub session_ttl: Duration,
    pub user_agent: String,
    pub auth_method: AuthMethod,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            tribunal: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            rate_limit: Duration::from_secs(1),
            proxies: Vec::new(),
            enable_rotation: true,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            session_ttl: Duration::from_secs(30 * 60),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            auth_method: AuthMethod::Form,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `EJUSTICA_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix(ENV_PREFIX)
    }

    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env_with_prefix`](Self::from_env_with_prefix) with an
    /// arbitrary variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ClientConfig::default();
        let var = |name: &str| {
            let key = format!("{prefix}_{name}");
            lookup(&key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(|value| (key, value))
        };

        if let Some((key, value)) = var("BASE_URL") {
            let url = Url::parse(&value)
                .map_err(|err| ConfigError::invalid_value(&key, &value, err.to_string()))?;
            config.base_url = Some(url);
        }
        if let Some((_, value)) = var("TRIBUNAL") {
            config.tribunal = Some(value.to_uppercase());
        }
        if let Some((key, value)) = var("TIMEOUT") {
            config.timeout = parse_secs(&key, &value)?;
        }
        if let Some((key, value)) = var("MAX_RETRIES") {
            config.max_retries = parse_number(&key, &value)?;
        }
        if let Some((key, value)) = var("RATE_LIMIT") {
            config.rate_limit = parse_secs(&key, &value)?;
        }
        if let Some((_, value)) = var("PROXIES") {
            config.proxies = value
                .split(',')
                .map(str::trim)
                .filter(|proxy| !proxy.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some((key, value)) = var("ENABLE_ROTATION") {
            config.enable_rotation = parse_bool(&key, &value)?;
        }
        if let Some((key, value)) = var("FAILURE_THRESHOLD") {
            config.failure_threshold = parse_number(&key, &value)?;
        }
        if let Some((key, value)) = var("RECOVERY_TIMEOUT") {
            config.recovery_timeout = parse_secs(&key, &value)?;
        }
        if let Some((key, value)) = var("BACKOFF_BASE") {
            config.backoff_base = parse_secs(&key, &value)?;
        }
        if let Some((key, value)) = var("MAX_BACKOFF") {
            config.max_backoff = parse_secs(&key, &value)?;
        }
        if let Some((key, value)) = var("SESSION_TTL") {
            config.session_ttl = parse_secs(&key, &value)?;
        }
        if let Some((_, value)) = var("USER_AGENT") {
            config.user_agent = value;
        }
        if let Some((key, value)) = var("AUTH_METHOD") {
            config.auth_method = match value.to_ascii_lowercase().as_str() {
                "form" | "senha" => AuthMethod::Form,
                "certificate" | "certificado" => AuthMethod::Certificate,
                _ => {
                    return Err(ConfigError::invalid_value(
                        &key,
                        &value,
                        "expected `form` or `certificate`",
                    ));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid("failure_threshold must be at least 1".into()));
        }
        if self.max_backoff < self.backoff_base {
            return Err(ConfigError::Invalid(
                "max_backoff must not be shorter than backoff_base".into(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("user_agent must not be empty".into()));
        }
        if let Some(ref base_url) = self.base_url
            && !matches!(base_url.scheme(), "http" | "https")
        {
            return Err(ConfigError::Invalid(format!(
                "base_url must be http(s), got {base_url}"
            )));
        }
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = value
        .parse()
        .map_err(|_| ConfigError::invalid_value(key, value, "expected seconds"))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|err| ConfigError::invalid_value(key, value, err.to_string()))
}

fn parse_number(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid_value(key, value, "expected a non-negative integer"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid_value(key, value, "expected a boolean")),
    }
}

/// Fluent builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.config.base_url = Some(base_url);
        self
    }

    pub fn with_tribunal(mut self, codigo: impl Into<String>) -> Self {
        self.config.tribunal = Some(codigo.into().to_uppercase());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn with_proxies<I, S>(mut self, proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rotation(mut self, enabled: bool) -> Self {
        self.config.enable_rotation = enabled;
        self
    }

    pub fn with_circuit_breaker(mut self, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        self.config.failure_threshold = failure_threshold;
        self.config.recovery_timeout = recovery_timeout;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.backoff_base = base;
        self.config.max_backoff = max;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl = ttl;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn with_auth_method(mut self, method: AuthMethod) -> Self {
        self.config.auth_method = method;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.rate_limit, Duration::from_secs(1));
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.auth_method, AuthMethod::Form);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_json() {
        let config = ClientConfig::from_json_str(
            r#"{"timeout": 12.5, "rate_limit": 0, "proxies": ["http://p1:8080"], "auth_method": "certificate"}"#,
        )
        .unwrap();
        assert_eq!(config.timeout, Duration::from_millis(12_500));
        assert_eq!(config.rate_limit, Duration::ZERO);
        assert_eq!(config.proxies, vec!["http://p1:8080".to_string()]);
        assert_eq!(config.auth_method, AuthMethod::Certificate);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn base_url_survives_json() {
        let config = ClientConfig::from_json_str(
            r#"{"base_url": "https://pje1g.trf1.jus.br/", "tribunal": "TRF1"}"#,
        )
        .unwrap();
        assert_eq!(
            config.base_url.as_ref().map(Url::as_str),
            Some("https://pje1g.trf1.jus.br/")
        );
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(ClientConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn rejects_invalid_json_values() {
        assert!(matches!(
            ClientConfig::from_json_str(r#"{"timeout": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_json_str(r#"{"rate_limit": -1}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn reads_prefixed_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("EJUSTICA_BASE_URL", "https://projudi.example.jus.br"),
            ("EJUSTICA_TRIBUNAL", "tjgo"),
            ("EJUSTICA_MAX_RETRIES", "5"),
            ("EJUSTICA_PROXIES", "http://a:1, http://b:2,"),
            ("EJUSTICA_ENABLE_ROTATION", "false"),
            ("EJUSTICA_SESSION_TTL", "900"),
        ]);
        let config =
            ClientConfig::from_lookup("EJUSTICA", |key| vars.get(key).map(|v| v.to_string()))
                .unwrap();
        assert_eq!(config.tribunal.as_deref(), Some("TJGO"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.proxies, vec!["http://a:1".to_string(), "http://b:2".to_string()]);
        assert!(!config.enable_rotation);
        assert_eq!(config.session_ttl, Duration::from_secs(900));
        assert_eq!(
            config.base_url.map(String::from).as_deref(),
            Some("https://projudi.example.jus.br/")
        );
    }

    #[test]
    fn env_errors_name_the_variable() {
        let err = ClientConfig::from_lookup("EJUSTICA", |key| {
            (key == "EJUSTICA_TIMEOUT").then(|| "soon".to_string())
        })
        .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "EJUSTICA_TIMEOUT"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn builder_validates() {
        assert!(ClientConfig::builder().with_timeout(Duration::ZERO).build().is_err());
        assert!(
            ClientConfig::builder()
                .with_circuit_breaker(0, Duration::from_secs(1))
                .build()
                .is_err()
        );
        let config = ClientConfig::builder()
            .with_tribunal("trf1")
            .with_rate_limit(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(config.tribunal.as_deref(), Some("TRF1"));
    }
}
