use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ejustica_scraper::{
    CircuitState, ClientConfig, ClientConfigBuilder, ConsultaProcesso, Credentials,
    EjusticaClient, EventHandler, HttpTransport, ScraperError, ScraperEvent,
    StaticSecretProvider, TransportError, TransportRequest, TransportResponse,
};
use http::Method;
use http::header::{COOKIE, HeaderValue, SET_COOKIE};
use tokio_util::sync::CancellationToken;
use url::Url;

const NUMERO: &str = "5123456-77.2024.8.09.0051";
const LOGIN_PATH: &str = "/projudi/usuario/logon.do";
const CONSULTA_PATH: &str = "/projudi/processo/buscaProcesso.do";

const LOGIN_PAGE: &str = r#"<html><body>
    <form method="post" action="logon.do">
        <input type="hidden" name="token" value="t1">
        <input type="text" name="login">
        <input type="password" name="senha">
    </form></body></html>"#;

const PROCESS_PAGE: &str = r#"<html><body>
    <h3>Processo 5123456-77.2024.8.09.0051</h3>
    <table>
        <tr><td>Classe:</td><td>Procedimento Comum Cível</td></tr>
        <tr><td>Situação:</td><td>Em tramitação</td></tr>
    </table>
    <table id="movimentacoes">
        <tr><td>10/02/2024</td><td>Conclusos para decisão</td></tr>
    </table></body></html>"#;

const PROCESS_PAGE_EMPTY_GRID: &str = r#"<html><body>
    <h3>Processo 5123456-77.2024.8.09.0051</h3>
    <table>
        <tr><td>Classe:</td><td>Execução Fiscal</td></tr>
    </table>
    <table id="intimacoes">
        <tr><td>Nenhum registro encontrado</td></tr>
    </table></body></html>"#;

const TJSP_NUMERO: &str = "1001234-88.2023.8.26.0100";
const ESAJ_LOGIN_PATH: &str = "/sajcas/login";
const ESAJ_CONSULTA_PATH: &str = "/cpopg/search.do";
const TJSP_PAGE: &str = r#"<html><body>
    <span id="numeroProcesso">1001234-88.2023.8.26.0100</span>
    <table><tr><td>Classe:</td><td>Procedimento Comum Cível</td></tr></table>
    </body></html>"#;

#[derive(Clone)]
struct Reply {
    status: u16,
    body: &'static str,
    cookie: Option<&'static str>,
}

fn reply(status: u16, body: &'static str) -> Reply {
    Reply {
        status,
        body,
        cookie: None,
    }
}

fn reply_with_cookie(body: &'static str, cookie: &'static str) -> Reply {
    Reply {
        status: 200,
        body,
        cookie: Some(cookie),
    }
}

/// Replies per `(method, path)`; the last reply of a route repeats.
#[derive(Default)]
struct ScriptedPortal {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    seen: Mutex<Vec<TransportRequest>>,
}

impl ScriptedPortal {
    fn on(self, method: Method, path: &str, replies: Vec<Reply>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert((method, path.to_string()), replies.into());
        self
    }

    fn calls(&self, method: Method, path: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.method == method && req.url.path() == path)
            .count()
    }

    fn last_form(&self) -> Option<Vec<(String, String)>> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|req| req.form.clone())
    }
}

#[async_trait]
impl HttpTransport for ScriptedPortal {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.seen.lock().unwrap().push(request.clone());
        let key = (request.method.clone(), request.url.path().to_string());
        let next = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let next = next.unwrap_or_else(|| reply(404, "<p>Página não encontrada</p>"));

        let mut response = TransportResponse::new(next.status, request.url).with_body(next.body);
        if let Some(cookie) = next.cookie {
            response = response.with_header(SET_COOKIE, HeaderValue::from_static(cookie));
        }
        Ok(response)
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<&'static str>>,
}

impl EventHandler for Recorder {
    fn handle(&self, event: &ScraperEvent) {
        let name = match event {
            ScraperEvent::Request(_) => "request",
            ScraperEvent::Response(_) => "response",
            ScraperEvent::Retry(_) => "retry",
            ScraperEvent::Success(_) => "success",
            ScraperEvent::Failure(_) => "failure",
            ScraperEvent::CircuitOpened(_) => "circuit_opened",
            ScraperEvent::Authenticated(_) => "authenticated",
        };
        self.events.lock().unwrap().push(name);
    }
}

fn config() -> ClientConfigBuilder {
    ClientConfig::builder()
        .with_base_url(Url::parse("https://projudi.test").unwrap())
        .with_tribunal("TJGO")
        .with_rate_limit(Duration::ZERO)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

fn client_with(portal: Arc<ScriptedPortal>, config: ClientConfigBuilder) -> EjusticaClient {
    EjusticaClient::builder()
        .with_config(config.build().unwrap())
        .with_transport(portal)
        .build()
        .unwrap()
}

fn login_portal(result: Reply) -> ScriptedPortal {
    ScriptedPortal::default()
        .on(Method::GET, LOGIN_PATH, vec![reply(200, LOGIN_PAGE)])
        .on(Method::POST, LOGIN_PATH, vec![result])
}

#[tokio::test]
async fn form_login_builds_authenticated_session() {
    let portal = Arc::new(login_portal(reply_with_cookie(
        "<h1>Bem-vindo ao PROJUDI</h1>",
        "projudi_sessao=abc123; Path=/projudi; HttpOnly",
    )));
    let recorder = Arc::new(Recorder::default());
    let client = EjusticaClient::builder()
        .with_config(config().build().unwrap())
        .with_transport(portal.clone())
        .with_event_handler(recorder.clone())
        .build()
        .unwrap();

    client
        .login(Credentials::senha("529.982.247-25", "segredo"))
        .await
        .unwrap();

    let session = client.session().await;
    assert!(session.is_authenticated);
    assert!(session.is_valid());
    assert_eq!(session.cookies.get("projudi_sessao").map(String::as_str), Some("abc123"));

    let form = portal.last_form().unwrap();
    assert!(form.contains(&("login".to_string(), "52998224725".to_string())));
    assert!(form.contains(&("senha".to_string(), "segredo".to_string())));
    assert!(form.contains(&("token".to_string(), "t1".to_string())));

    assert!(recorder.events.lock().unwrap().contains(&"authenticated"));
}

#[tokio::test]
async fn rejected_credentials_are_an_authentication_error() {
    let portal = Arc::new(login_portal(reply(
        200,
        "<div class='erro'>Usuário ou senha inválidos.</div><a>Sair</a>",
    )));
    let client = client_with(portal, config());

    let result = client.login(Credentials::senha("52998224725", "errada")).await;
    assert!(matches!(result, Err(ScraperError::Authentication(_))));
    assert!(!client.session().await.is_authenticated);
}

#[tokio::test]
async fn login_without_any_marker_is_ambiguous() {
    let portal = Arc::new(login_portal(reply(200, "<p>Aguarde...</p>")));
    let client = client_with(portal, config());

    let result = client.login(Credentials::senha("52998224725", "x")).await;
    assert!(matches!(result, Err(ScraperError::AuthenticationAmbiguous(_))));
}

#[tokio::test]
async fn sealed_case_is_found_and_flagged() {
    let portal = Arc::new(ScriptedPortal::default().on(
        Method::GET,
        CONSULTA_PATH,
        vec![reply(
            200,
            "<p>Processo 5123456-77.2024.8.09.0051 tramita em SEGREDO DE JUSTIÇA.</p>",
        )],
    ));
    let client = client_with(portal, config());

    let consulta = client.buscar_processo("51234567720248090051").await.unwrap();
    let processo = consulta.into_processo().unwrap();
    assert!(processo.segredo_justica());
    assert_eq!(processo.numero_processo(), NUMERO);
    assert_eq!(processo.to_dict()["segredo_justica"], true);
}

#[tokio::test]
async fn missing_process_is_not_an_error() {
    let portal = Arc::new(ScriptedPortal::default().on(
        Method::GET,
        CONSULTA_PATH,
        vec![reply(200, "<p>Nenhum processo encontrado para os critérios informados.</p>")],
    ));
    let client = client_with(portal, config());

    let consulta = client.buscar_processo(NUMERO).await.unwrap();
    assert_eq!(
        consulta,
        ConsultaProcesso::NaoEncontrado {
            numero: NUMERO.to_string()
        }
    );
}

#[tokio::test]
async fn empty_sub_grid_is_still_a_found_process() {
    let portal = Arc::new(ScriptedPortal::default().on(
        Method::GET,
        CONSULTA_PATH,
        vec![reply(200, PROCESS_PAGE_EMPTY_GRID)],
    ));
    let client = client_with(portal, config());

    let processo = client
        .buscar_processo(NUMERO)
        .await
        .unwrap()
        .into_processo()
        .unwrap();
    assert_eq!(processo.classe(), Some("Execução Fiscal"));
    assert!(processo.intimacoes().is_empty());
    assert_eq!(client.circuit_state("TJGO"), CircuitState::Closed);
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let portal = Arc::new(ScriptedPortal::default().on(
        Method::GET,
        CONSULTA_PATH,
        vec![reply(503, "indisponível"), reply(200, PROCESS_PAGE)],
    ));
    let client = client_with(portal.clone(), config());

    let consulta = client.buscar_processo(NUMERO).await.unwrap();
    let processo = consulta.processo().unwrap();
    assert_eq!(processo.classe(), Some("Procedimento Comum Cível"));
    assert_eq!(processo.movimentacoes().len(), 1);
    assert_eq!(portal.calls(Method::GET, CONSULTA_PATH), 2);
    assert_eq!(client.circuit_state("TJGO"), CircuitState::Closed);
}

#[tokio::test]
async fn breaker_opens_after_threshold_and_fails_fast() {
    let portal = Arc::new(ScriptedPortal::default().on(
        Method::GET,
        CONSULTA_PATH,
        vec![reply(503, "indisponível")],
    ));
    let client = client_with(
        portal.clone(),
        config()
            .with_max_retries(0)
            .with_circuit_breaker(2, Duration::from_secs(60)),
    );

    for _ in 0..2 {
        assert!(matches!(
            client.buscar_processo(NUMERO).await,
            Err(ScraperError::Server { status: 503 })
        ));
    }
    assert_eq!(client.circuit_state("TJGO"), CircuitState::Open);

    assert!(matches!(
        client.buscar_processo(NUMERO).await,
        Err(ScraperError::CircuitBreakerOpen { .. })
    ));
    assert_eq!(portal.calls(Method::GET, CONSULTA_PATH), 2);
}

#[tokio::test]
async fn expired_session_triggers_one_reauthentication() {
    let portal = Arc::new(
        login_portal(reply_with_cookie(
            "<a href='/logout'>Sair</a> Bem-vindo",
            "projudi_sessao=s1; Path=/",
        ))
        .on(
            Method::GET,
            CONSULTA_PATH,
            vec![
                reply(200, "<p>Sua sessão expirou. Efetue login novamente.</p>"),
                reply(200, PROCESS_PAGE),
            ],
        ),
    );
    let client = client_with(portal.clone(), config());
    client
        .login(Credentials::senha("52998224725", "segredo"))
        .await
        .unwrap();

    let consulta = client.buscar_processo(NUMERO).await.unwrap();
    assert!(consulta.is_encontrado());
    assert_eq!(portal.calls(Method::POST, LOGIN_PATH), 2);
    assert_eq!(portal.calls(Method::GET, CONSULTA_PATH), 2);
}

#[tokio::test]
async fn login_wall_without_credentials_is_an_authentication_error() {
    let portal = Arc::new(ScriptedPortal::default().on(
        Method::GET,
        CONSULTA_PATH,
        vec![reply(200, LOGIN_PAGE)],
    ));
    let client = client_with(portal, config());

    assert!(matches!(
        client.buscar_processo(NUMERO).await,
        Err(ScraperError::Authentication(_))
    ));
}

#[tokio::test]
async fn secret_provider_credentials_log_in_on_demand() {
    let portal = Arc::new(
        login_portal(reply_with_cookie("Bem-vindo", "projudi_sessao=s2; Path=/"))
            .on(Method::GET, CONSULTA_PATH, vec![reply(200, PROCESS_PAGE)]),
    );
    let client = EjusticaClient::builder()
        .with_config(config().build().unwrap())
        .with_transport(portal.clone())
        .with_secret_provider(Arc::new(StaticSecretProvider::new(Credentials::senha(
            "52998224725",
            "segredo",
        ))))
        .build()
        .unwrap();

    assert!(client.buscar_processo(NUMERO).await.unwrap().is_encontrado());
    assert_eq!(portal.calls(Method::POST, LOGIN_PATH), 1);

    assert!(client.buscar_processo(NUMERO).await.unwrap().is_encontrado());
    assert_eq!(portal.calls(Method::POST, LOGIN_PATH), 1);
}

#[tokio::test]
async fn health_check_probes_once() {
    let portal = Arc::new(ScriptedPortal::default().on(Method::GET, "/", vec![reply(200, "ok")]));
    let client = client_with(portal.clone(), config());

    let status = client.health_check().await;
    assert!(status.is_ok());
    assert!(status.detail.is_none());

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["latency_ms"].is_u64());
    assert_eq!(portal.calls(Method::GET, "/"), 1);
}

#[tokio::test]
async fn health_check_reports_server_failures_without_retry() {
    let portal = Arc::new(ScriptedPortal::default().on(Method::GET, "/", vec![reply(502, "")]));
    let client = client_with(portal.clone(), config());

    let status = client.health_check().await;
    assert!(!status.is_ok());
    assert_eq!(portal.calls(Method::GET, "/"), 1);
}

struct SlowPortal;

#[async_trait]
impl HttpTransport for SlowPortal {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(TransportResponse::new(200, request.url).with_body(PROCESS_PAGE))
    }
}

#[tokio::test]
async fn cancellation_aborts_in_flight_lookup() {
    let client = EjusticaClient::builder()
        .with_config(config().build().unwrap())
        .with_transport(Arc::new(SlowPortal))
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = client.buscar_processo_cancelavel(NUMERO, &token).await;
    assert!(matches!(result, Err(ScraperError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.circuit_state("TJGO"), CircuitState::Closed);
}

#[tokio::test]
async fn explicit_tribunal_must_match_the_number() {
    let portal = Arc::new(ScriptedPortal::default());
    let client = client_with(
        portal.clone(),
        ClientConfig::builder().with_rate_limit(Duration::ZERO),
    );

    assert!(matches!(
        client.buscar_processo_em(NUMERO, "TJSP").await,
        Err(ScraperError::Validation(_))
    ));
    assert_eq!(portal.seen.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn credentials_stay_with_their_tribunal() {
    let portal = Arc::new(
        login_portal(reply_with_cookie("Bem-vindo", "projudi_sessao=s3; Path=/"))
            .on(Method::GET, ESAJ_CONSULTA_PATH, vec![reply(200, TJSP_PAGE)]),
    );
    let client = client_with(portal.clone(), config());
    client
        .login(Credentials::senha("52998224725", "senha-do-tjgo"))
        .await
        .unwrap();

    let consulta = client.buscar_processo_em(TJSP_NUMERO, "TJSP").await.unwrap();
    assert_eq!(
        consulta.processo().map(|p| p.numero_processo()),
        Some(TJSP_NUMERO)
    );
    assert_eq!(portal.calls(Method::POST, LOGIN_PATH), 1);
    assert_eq!(portal.calls(Method::POST, ESAJ_LOGIN_PATH), 0);

    let seen = portal.seen.lock().unwrap();
    let esaj = seen
        .iter()
        .find(|req| req.url.path() == ESAJ_CONSULTA_PATH)
        .unwrap();
    assert!(esaj.form.is_none());
    assert!(esaj.headers.get(COOKIE).is_none());
}

/// Fails once, stalls on the second call, then serves the process page.
#[derive(Default)]
struct StallingPortal {
    calls: AtomicUsize,
}

#[async_trait]
impl HttpTransport for StallingPortal {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        match self.calls.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(TransportResponse::new(500, request.url)),
            1 => {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(TransportResponse::new(200, request.url).with_body(PROCESS_PAGE))
            }
            _ => Ok(TransportResponse::new(200, request.url).with_body(PROCESS_PAGE)),
        }
    }
}

#[tokio::test]
async fn abandoned_half_open_attempt_does_not_block_the_tribunal() {
    let portal = Arc::new(StallingPortal::default());
    let client = EjusticaClient::builder()
        .with_config(
            config()
                .with_max_retries(0)
                .with_circuit_breaker(1, Duration::from_millis(50))
                .build()
                .unwrap(),
        )
        .with_transport(portal.clone())
        .build()
        .unwrap();

    assert!(matches!(
        client.buscar_processo(NUMERO).await,
        Err(ScraperError::Server { status: 500 })
    ));
    assert_eq!(client.circuit_state("TJGO"), CircuitState::Open);
    tokio::time::sleep(Duration::from_millis(80)).await;

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), client.buscar_processo(NUMERO)).await;
    assert!(abandoned.is_err());

    let consulta = client.buscar_processo(NUMERO).await.unwrap();
    assert!(consulta.is_encontrado());
    assert_eq!(client.circuit_state("TJGO"), CircuitState::Closed);
    assert_eq!(portal.calls.load(Ordering::SeqCst), 3);
}
