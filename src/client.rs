//! High level client orchestration.
//!
//! Wires the router, authenticators, retry orchestrator and parsers into
//! the public facade: normalize, route, authenticate when needed, fetch
//! under retry, classify, parse.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::{
	AuthContext, AuthMethod, Authenticator, CertificateAuthenticator, Credentials,
	FormAuthenticator, LoginMarkers,
};
use crate::config::{ClientConfig, SecretProvider};
use crate::core::{
	BackoffPolicy, Dispatcher, HttpTransport, ReqwestTransport, TransportRequest,
	TransportResponse, ensure_transport_success,
};
use crate::domain::ProcessoJudicial;
use crate::error::{ScraperError, ScraperResult};
use crate::external_deps::CaptchaSolver;
use crate::modules::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use crate::modules::events::{AuthenticatedEvent, EventDispatcher, EventHandler, ScraperEvent};
use crate::modules::proxy::{ProxyManager, ProxyStats};
use crate::modules::rate_limit::RateLimiter;
use crate::modules::retry::{RetryOrchestrator, RetryPolicy};
use crate::modules::session::SessionCache;
use crate::parsers::{LabelParser, PageClassifier, PageKind, ProcessoParser};
use crate::tribunais::{Tribunal, TribunalRouter};
use crate::utils::normalizar_numero_processo;

/// Outcome of a lookup. A missing process is an expected answer, not an
/// error; sealed cases are found with `segredo_justica` set.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsultaProcesso {
	Encontrado(ProcessoJudicial),
	NaoEncontrado { numero: String },
}

impl ConsultaProcesso {
	pub fn is_encontrado(&self) -> bool {
		matches!(self, ConsultaProcesso::Encontrado(_))
	}

	pub fn processo(&self) -> Option<&ProcessoJudicial> {
		match self {
			ConsultaProcesso::Encontrado(processo) => Some(processo),
			ConsultaProcesso::NaoEncontrado { .. } => None,
		}
	}

	pub fn into_processo(self) -> Option<ProcessoJudicial> {
		match self {
			ConsultaProcesso::Encontrado(processo) => Some(processo),
			ConsultaProcesso::NaoEncontrado { .. } => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
	Ok,
	Error,
}

/// Result of a single reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
	pub status: HealthState,
	pub latency_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

impl HealthStatus {
	pub fn is_ok(&self) -> bool {
		self.status == HealthState::Ok
	}
}

/// Session state; one writer per client.
struct ClientState {
	session: SessionCache,
	session_tribunal: Option<String>,
	credentials: HashMap<String, Credentials>,
}

/// Fluent builder for [`EjusticaClient`].
pub struct EjusticaClientBuilder {
	config: ClientConfig,
	transport: Option<Arc<dyn HttpTransport>>,
	parser: Option<Arc<dyn ProcessoParser>>,
	authenticator: Option<Arc<dyn Authenticator>>,
	captcha: Option<Arc<dyn CaptchaSolver>>,
	secrets: Option<Arc<dyn SecretProvider>>,
	proxies: Option<ProxyManager>,
	handlers: Vec<Arc<dyn EventHandler>>,
	markers: Option<LoginMarkers>,
	router: Option<TribunalRouter>,
}

impl EjusticaClientBuilder {
	pub fn new() -> Self {
		Self {
			config: ClientConfig::default(),
			transport: None,
			parser: None,
			authenticator: None,
			captcha: None,
			secrets: None,
			proxies: None,
			handlers: Vec::new(),
			markers: None,
			router: None,
		}
	}

	pub fn with_config(mut self, config: ClientConfig) -> Self {
		self.config = config;
		self
	}

	/// Replaces the reqwest transport (tests, custom stacks).
	pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_parser(mut self, parser: Arc<dyn ProcessoParser>) -> Self {
		self.parser = Some(parser);
		self
	}

	/// Overrides the authenticator picked from `auth_method`.
	pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
		self.authenticator = Some(authenticator);
		self
	}

	pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
		self.captcha = Some(solver);
		self
	}

	pub fn with_secret_provider(mut self, provider: Arc<dyn SecretProvider>) -> Self {
		self.secrets = Some(provider);
		self
	}

	/// Shares one proxy pool (and its counters) between clients. Takes
	/// precedence over `proxies` in the configuration.
	pub fn with_proxy_manager(mut self, manager: ProxyManager) -> Self {
		self.proxies = Some(manager);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	/// Uses `markers` for every tribunal instead of the per-system defaults.
	pub fn with_login_markers(mut self, markers: LoginMarkers) -> Self {
		self.markers = Some(markers);
		self
	}

	pub fn with_router(mut self, router: TribunalRouter) -> Self {
		self.router = Some(router);
		self
	}

	pub fn build(self) -> ScraperResult<EjusticaClient> {
		EjusticaClient::from_builder(self)
	}
}

impl Default for EjusticaClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Scraping client for one set of credentials.
pub struct EjusticaClient {
	config: ClientConfig,
	router: TribunalRouter,
	dispatcher: Dispatcher,
	orchestrator: RetryOrchestrator,
	classifier: PageClassifier,
	parser: Arc<dyn ProcessoParser>,
	authenticator: Arc<dyn Authenticator>,
	captcha: Option<Arc<dyn CaptchaSolver>>,
	secrets: Option<Arc<dyn SecretProvider>>,
	markers: Option<LoginMarkers>,
	proxies: Option<ProxyManager>,
	events: Arc<EventDispatcher>,
	state: Mutex<ClientState>,
}

impl EjusticaClient {
	/// Client with default configuration and the reqwest transport.
	pub fn new() -> ScraperResult<Self> {
		Self::builder().build()
	}

	pub fn with_config(config: ClientConfig) -> ScraperResult<Self> {
		Self::builder().with_config(config).build()
	}

	pub fn builder() -> EjusticaClientBuilder {
		EjusticaClientBuilder::new()
	}

	fn from_builder(builder: EjusticaClientBuilder) -> ScraperResult<Self> {
		let EjusticaClientBuilder {
			config,
			transport,
			parser,
			authenticator,
			captcha,
			secrets,
			proxies,
			handlers,
			markers,
			router,
		} = builder;
		config.validate()?;

		let mut events = EventDispatcher::with_logging();
		for handler in handlers {
			events.register_handler(handler);
		}
		let events = Arc::new(events);

		let proxies = proxies.or_else(|| {
			(!config.proxies.is_empty()).then(|| {
				ProxyManager::from_config(config.proxies.iter().cloned(), config.enable_rotation)
			})
		});

		let transport: Arc<dyn HttpTransport> = transport
			.unwrap_or_else(|| Arc::new(ReqwestTransport::new(config.user_agent.as_str())));
		let dispatcher = Dispatcher::new(transport, events.clone())
			.with_proxies(proxies.clone())
			.with_timeout(config.timeout);

		let orchestrator = RetryOrchestrator::new(
			RetryPolicy::new(
				config.max_retries,
				BackoffPolicy::new(config.backoff_base, config.max_backoff),
			),
			CircuitBreakerRegistry::new(config.failure_threshold, config.recovery_timeout),
			Arc::new(RateLimiter::new(config.rate_limit)),
			events.clone(),
		);

		let authenticator = authenticator.unwrap_or_else(|| match config.auth_method {
			AuthMethod::Form => Arc::new(FormAuthenticator::new()) as Arc<dyn Authenticator>,
			AuthMethod::Certificate => Arc::new(CertificateAuthenticator::new()),
		});

		let router = router
			.unwrap_or_default()
			.with_base_url_override(config.base_url.clone());

		let state = ClientState {
			session: SessionCache::new(config.user_agent.as_str(), config.session_ttl),
			session_tribunal: None,
			credentials: HashMap::new(),
		};

		log::debug!(
			"client ready: auth={}, proxies={}, max_retries={}, rate_limit={:.2}s",
			authenticator.method(),
			proxies.as_ref().map(ProxyManager::len).unwrap_or_default(),
			config.max_retries,
			config.rate_limit.as_secs_f64()
		);

		Ok(Self {
			config,
			router,
			dispatcher,
			orchestrator,
			classifier: PageClassifier::new(),
			parser: parser.unwrap_or_else(|| Arc::new(LabelParser::new())),
			authenticator,
			captcha,
			secrets,
			markers,
			proxies,
			events,
			state: Mutex::new(state),
		})
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Authenticates against the configured default tribunal.
	pub async fn login(&self, credentials: Credentials) -> ScraperResult<()> {
		let codigo = self.config.tribunal.clone().ok_or_else(|| {
			ScraperError::Validation("no default tribunal configured; use login_em".into())
		})?;
		self.login_em(credentials, &codigo).await
	}

	/// Authenticates against `codigo`. The credentials are kept for later
	/// re-authentication against that tribunal only.
	pub async fn login_em(&self, credentials: Credentials, codigo: &str) -> ScraperResult<()> {
		let tribunal = self
			.router
			.get(codigo)
			.ok_or_else(|| ScraperError::Validation(format!("unknown tribunal code '{codigo}'")))?;

		let mut state = self.state.lock().await;
		self.authenticate(&mut state, &tribunal, &credentials, None)
			.await?;
		state.credentials.insert(tribunal.codigo.clone(), credentials);
		Ok(())
	}

	/// Copy of the current session.
	pub async fn session(&self) -> SessionCache {
		self.state.lock().await.session.clone()
	}

	/// Drops the session; the next lookup authenticates again.
	pub async fn invalidate_session(&self) {
		let mut state = self.state.lock().await;
		state.session.invalidate();
		state.session_tribunal = None;
	}

	pub async fn buscar_processo(&self, numero: &str) -> ScraperResult<ConsultaProcesso> {
		self.consultar(numero, None, None).await
	}

	/// Lookup against an explicit tribunal code, which must agree with the
	/// tribunal encoded in the number.
	pub async fn buscar_processo_em(
		&self,
		numero: &str,
		codigo: &str,
	) -> ScraperResult<ConsultaProcesso> {
		self.consultar(numero, Some(codigo), None).await
	}

	/// Lookup that aborts the in-flight request and any pending retry when
	/// `token` is cancelled.
	pub async fn buscar_processo_cancelavel(
		&self,
		numero: &str,
		token: &CancellationToken,
	) -> ScraperResult<ConsultaProcesso> {
		self.consultar(numero, None, Some(token)).await
	}

	/// Probes the default tribunal (or `base_url`) once, without retry.
	pub async fn health_check(&self) -> HealthStatus {
		let started = Instant::now();
		let target = self.health_target();
		let outcome = match target {
			Ok((ref label, ref url)) => {
				let mut session =
					SessionCache::new(self.config.user_agent.as_str(), self.config.session_ttl);
				self.dispatcher
					.send(label, TransportRequest::get(url.clone()), &mut session)
					.await
					.and_then(ensure_transport_success)
			}
			Err(err) => Err(err),
		};
		let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

		match outcome {
			Ok(response) => {
				log::debug!("health check ok: HTTP {} in {latency_ms}ms", response.status);
				HealthStatus {
					status: HealthState::Ok,
					latency_ms,
					detail: None,
				}
			}
			Err(err) => {
				log::warn!("health check failed after {latency_ms}ms: {err}");
				HealthStatus {
					status: HealthState::Error,
					latency_ms,
					detail: Some(err.to_string()),
				}
			}
		}
	}

	pub fn circuit_state(&self, codigo: &str) -> CircuitState {
		self.orchestrator
			.breakers()
			.state(&codigo.trim().to_uppercase())
	}

	pub fn proxy_stats(&self) -> HashMap<String, ProxyStats> {
		self.proxies
			.as_ref()
			.map(ProxyManager::get_stats)
			.unwrap_or_default()
	}

	fn health_target(&self) -> ScraperResult<(String, Url)> {
		if let Some(ref codigo) = self.config.tribunal {
			let tribunal = self.router.get(codigo).ok_or_else(|| {
				ScraperError::Validation(format!("unknown tribunal code '{codigo}'"))
			})?;
			return Ok((tribunal.codigo.clone(), tribunal.base_url));
		}
		match self.config.base_url {
			Some(ref url) => Ok((url.host_str().unwrap_or("base_url").to_string(), url.clone())),
			None => Err(ScraperError::Validation(
				"health check needs a default tribunal or base_url".into(),
			)),
		}
	}

	async fn consultar(
		&self,
		numero: &str,
		codigo: Option<&str>,
		cancel: Option<&CancellationToken>,
	) -> ScraperResult<ConsultaProcesso> {
		if cancel.is_some_and(CancellationToken::is_cancelled) {
			return Err(ScraperError::Cancelled);
		}

		let numero = normalizar_numero_processo(numero)?;
		let explicito = codigo.or(self.config.tribunal.as_deref());
		let tribunal = self.router.resolver(&numero, explicito)?;
		log::debug!("[{}] looking up {numero}", tribunal.codigo);

		let mut state = self.state.lock().await;
		self.ensure_session(&mut state, &tribunal, cancel).await?;

		let mut reauthenticated = false;
		loop {
			match self
				.fetch(&mut state.session, &tribunal, &numero, cancel)
				.await
			{
				Ok(html) => {
					let processo = self.parser.parse(&html, &numero, &tribunal)?;
					log::info!(
						"[{}] {numero}: {} movement(s), {} part(ies){}",
						tribunal.codigo,
						processo.movimentacoes().len(),
						processo.partes().len(),
						if processo.segredo_justica() { ", sealed" } else { "" }
					);
					return Ok(ConsultaProcesso::Encontrado(processo));
				}
				Err(ScraperError::ProcessoNaoEncontrado { numero }) => {
					log::info!("[{}] {numero} not found", tribunal.codigo);
					return Ok(ConsultaProcesso::NaoEncontrado { numero });
				}
				Err(ScraperError::SessaoExpirada { .. }) if !reauthenticated => {
					log::info!("[{}] session rejected, authenticating again", tribunal.codigo);
					state.session.invalidate();
					let credentials = self.credentials_for(&state, &tribunal)?.ok_or_else(|| {
						ScraperError::Authentication(format!(
							"{} requires login and no credentials are available",
							tribunal.codigo
						))
					})?;
					self.authenticate(&mut state, &tribunal, &credentials, cancel)
						.await?;
					reauthenticated = true;
				}
				Err(err @ ScraperError::SessaoExpirada { .. }) => {
					state.session.invalidate();
					return Err(err);
				}
				Err(err) => return Err(err),
			}
		}
	}

	/// Reuses a usable session for the same tribunal; otherwise logs in
	/// when credentials are available, or starts an anonymous session.
	async fn ensure_session(
		&self,
		state: &mut ClientState,
		tribunal: &Tribunal,
		cancel: Option<&CancellationToken>,
	) -> ScraperResult<()> {
		let same_tribunal = state.session_tribunal.as_deref() == Some(tribunal.codigo.as_str());
		if same_tribunal && state.session.is_usable() {
			return Ok(());
		}

		match self.credentials_for(state, tribunal)? {
			Some(credentials) => {
				self.authenticate(state, tribunal, &credentials, cancel)
					.await
			}
			None => {
				if !same_tribunal || !state.session.is_valid() {
					state.session =
						SessionCache::new(self.config.user_agent.as_str(), self.config.session_ttl);
					state.session_tribunal = Some(tribunal.codigo.clone());
				}
				Ok(())
			}
		}
	}

	fn credentials_for(
		&self,
		state: &ClientState,
		tribunal: &Tribunal,
	) -> ScraperResult<Option<Credentials>> {
		if let Some(credentials) = state.credentials.get(&tribunal.codigo) {
			return Ok(Some(credentials.clone()));
		}
		match self.secrets {
			Some(ref provider) => provider.credentials(&tribunal.codigo),
			None => Ok(None),
		}
	}

	async fn authenticate(
		&self,
		state: &mut ClientState,
		tribunal: &Tribunal,
		credentials: &Credentials,
		cancel: Option<&CancellationToken>,
	) -> ScraperResult<()> {
		let authenticator = self.authenticator.as_ref();
		if authenticator.method() != credentials.method() {
			return Err(ScraperError::Validation(format!(
				"{} credentials given but the client authenticates with {}",
				credentials.method(),
				authenticator.method()
			)));
		}

		let markers = self
			.markers
			.clone()
			.unwrap_or_else(|| LoginMarkers::for_sistema(tribunal.sistema));
		let ctx = AuthContext {
			dispatcher: &self.dispatcher,
			tribunal,
			markers: &markers,
			user_agent: self.config.user_agent.as_str(),
			session_ttl: self.config.session_ttl,
			captcha: self.captcha.as_deref(),
		};
		let current = state.session.clone();

		let session = self
			.orchestrator
			.execute(&tribunal.codigo, "login", cancel, |_| {
				authenticator.authenticate(&ctx, credentials, &current)
			})
			.await?;

		self.events
			.dispatch(ScraperEvent::Authenticated(AuthenticatedEvent {
				target: tribunal.codigo.clone(),
				method: authenticator.method().to_string(),
				expires_at: session.expires_at,
				timestamp: Utc::now(),
			}));

		state.session = session;
		state.session_tribunal = Some(tribunal.codigo.clone());
		Ok(())
	}

	/// One retry-orchestrated consulta request returning the process page.
	/// The session is updated only from the attempt that produced it.
	async fn fetch(
		&self,
		session: &mut SessionCache,
		tribunal: &Tribunal,
		numero: &str,
		cancel: Option<&CancellationToken>,
	) -> ScraperResult<String> {
		let url = tribunal.consulta_url(numero)?;
		let target = tribunal.codigo.as_str();
		let dispatcher = &self.dispatcher;
		let classifier = self.classifier;
		let snapshot = session.clone();

		let (html, updated) = self
			.orchestrator
			.execute(target, "buscar_processo", cancel, |_| {
				let mut working = snapshot.clone();
				let request = TransportRequest::get(url.clone());
				async move {
					let response = dispatcher.send(target, request, &mut working).await?;
					let html = classificar_resposta(classifier, target, numero, response)?;
					Ok((html, working))
				}
			})
			.await?;

		*session = updated;
		Ok(html)
	}
}

/// Maps a consulta response onto the process page. Not-found and
/// rejected-session answers surface as non-retryable errors so the breaker
/// records them; the caller turns them back into outcomes.
fn classificar_resposta(
	classifier: PageClassifier,
	target: &str,
	numero: &str,
	response: TransportResponse,
) -> ScraperResult<String> {
	let nao_encontrado = || ScraperError::ProcessoNaoEncontrado {
		numero: numero.to_string(),
	};
	let expirada = || ScraperError::SessaoExpirada {
		target: target.to_string(),
	};

	match response.status {
		404 => return Err(nao_encontrado()),
		401 | 403 => return Err(expirada()),
		_ => {}
	}
	let response = ensure_transport_success(response)?;
	let html = response.text();

	match classifier.classify(&html, numero) {
		PageKind::NaoEncontrado => Err(nao_encontrado()),
		PageKind::SessaoExpirada | PageKind::LoginRequerido => Err(expirada()),
		PageKind::Captcha => Err(ScraperError::Captcha(format!(
			"{target} answered {numero} with a captcha challenge"
		))),
		PageKind::Processo | PageKind::Desconhecido => Ok(html),
	}
}

impl std::fmt::Debug for EjusticaClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EjusticaClient")
			.field("config", &self.config)
			.field("authenticator", &self.authenticator.method())
			.field("dispatcher", &self.dispatcher)
			.finish()
	}
}
