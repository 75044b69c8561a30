//! # ejustica-scraper
//!
//! Resilient extraction of judicial process data from Brazilian e-justice
//! portals (PROJUDI, e-SAJ, PJe).
//!
//! Process numbers are normalized to the CNJ format and routed to their
//! tribunal; the client authenticates (form or certificate), fetches the
//! process page under rate limiting, retries and per-tribunal circuit
//! breaking, and maps the HTML onto [`ProcessoJudicial`].
//!
//! ## Example
//!
//! ```no_run
//! use ejustica_scraper::{ClientConfig, ConsultaProcesso, Credentials, EjusticaClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder().with_tribunal("TJGO").build()?;
//!     let client = EjusticaClient::with_config(config)?;
//!     client.login(Credentials::senha("529.982.247-25", "senha")).await?;
//!
//!     match client.buscar_processo("5123456-77.2024.8.09.0051").await? {
//!         ConsultaProcesso::Encontrado(processo) => println!("{}", processo.to_dict()),
//!         ConsultaProcesso::NaoEncontrado { numero } => println!("{numero} not found"),
//!     }
//!     Ok(())
//! }
//! ```

mod client;

pub mod auth;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod external_deps;
pub mod modules;
pub mod parsers;
pub mod tribunais;
pub mod utils;

pub use crate::client::{
    ConsultaProcesso,
    EjusticaClient,
    EjusticaClientBuilder,
    HealthState,
    HealthStatus,
};

pub use crate::auth::{
    AuthContext,
    AuthMethod,
    AuthOutcome,
    Authenticator,
    CertificateAuthenticator,
    CertificateBundle,
    Credentials,
    FormAuthenticator,
    LoginMarkers,
};

pub use crate::config::{
    ClientConfig,
    ClientConfigBuilder,
    ConfigError,
    EnvSecretProvider,
    SecretProvider,
    StaticSecretProvider,
};

pub use crate::core::{
    HttpTransport,
    ReqwestTransport,
    TransportError,
    TransportRequest,
    TransportResponse,
};

pub use crate::domain::{
    Advogado,
    Documento,
    DocumentoParte,
    Intimacao,
    Movimentacao,
    Parte,
    ProcessoJudicial,
    ProcessoJudicialBuilder,
    StatusProcesso,
    TipoParte,
};

pub use crate::error::{ErrorKind, ScraperError, ScraperResult};

pub use crate::external_deps::{
    CaptchaError,
    CaptchaKind,
    CaptchaSolution,
    CaptchaSolver,
    CaptchaTask,
};

pub use crate::modules::{
    CircuitBreaker,
    CircuitBreakerRegistry,
    CircuitState,
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    ProxyManager,
    ProxyStats,
    RateLimiter,
    RotationStrategy,
    ScraperEvent,
    SessionCache,
};

pub use crate::parsers::{LabelParser, PageClassifier, PageKind, ProcessoParser};

pub use crate::tribunais::{SistemaOrigem, Tribunal, TribunalRouter};

pub use crate::utils::{
    normalizar_cnpj,
    normalizar_cpf,
    normalizar_numero_processo,
    parsear_data,
    parsear_valor_monetario,
    validar_cnpj,
    validar_cpf,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
