use crate::convert;
use crate::error::ServiceError;
use crate::karp::{DEFAULT_KARP_URL, KarpClient};
use crate::query::{
    KarpQuery, OutputFormat, build_query, overflow_guard_applies, page_size,
};
use crate::settings::Settings;
use crate::subtypes::SubtypeStore;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, error, info, warn};

type SharedState = Arc<AppState>;
const INFO: &str = "Minoritetsordlistans API.";
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: SubtypeStore,
    pub karp: KarpClient,
}

impl AppState {
    pub fn new(settings: Settings, karp: KarpClient) -> Self {
        let settings = Arc::new(settings);
        Self {
            store: SubtypeStore::new(Arc::clone(&settings)),
            settings,
            karp,
        }
    }

    fn mode_or_default(&self, mode: Option<&str>) -> Result<String, ServiceError> {
        match mode.map(str::trim).filter(|mode| !mode.is_empty()) {
            Some(mode) => Ok(mode.to_string()),
            None => self.settings.default_mode(),
        }
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub karp_url: String,
    pub upstream_timeout: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
            karp_url: DEFAULT_KARP_URL.to_string(),
            upstream_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
    Service(ServiceError),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
            WebError::Service(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

impl From<ServiceError> for WebError {
    fn from(value: ServiceError) -> Self {
        WebError::Service(value)
    }
}

pub async fn serve(config: WebConfig, settings: Settings) -> Result<(), WebError> {
    let karp = KarpClient::new(&config.karp_url, config.upstream_timeout)?;
    let modes = settings.modes();
    let state = Arc::new(AppState::new(settings, karp));
    let router = build_router(state);
    info!(
        %config.addr,
        karp = %config.karp_url,
        timeout = ?config.upstream_timeout,
        ?modes,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status =
            StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &err {
            ServiceError::Upstream(_) => {
                error!(error = %err, "karp call failed");
                "The lexical service could not be reached".to_string()
            }
            ServiceError::Storage(_) => {
                error!(error = %err, "subtype storage failed");
                "Could not access the published subtypes".to_string()
            }
            _ => {
                debug!(error = %err, status = status.as_u16(), "request failed");
                err.to_string()
            }
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers([
            HeaderName::from_static("x-requested-with"),
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ])
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS]);
    Router::new()
        .route("/", get(info).options(no_content))
        .route("/search", get(search).options(no_content))
        .route("/subtypes", get(subtypes).options(no_content))
        .route("/modes", get(modes).options(no_content))
        .route("/publish/:subtype", get(publish).options(no_content))
        .route("/unpublish/:subtype", get(unpublish).options(no_content))
        .route("/css", get(css).options(no_content))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn info() -> impl IntoResponse {
    Json(json!({
        "info": INFO,
        "endpoints": [
            "/search?mode=term-swefin&subtypes=muminfigurer&q=mumin&lang=sv",
            "/search?mode=term-swefin&subtypes=muminfigurer&format=html",
            "/subtypes?mode=term-swefin&unpublished=true",
            "/modes",
            "/publish/{subtype}?mode=term-swefin",
            "/unpublish/{subtype}?mode=term-swefin",
            "/css?mode=term-swefin",
        ],
    }))
}

/// `OPTIONS` requests the cors layer lets through.
async fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "ordlista" }))
}

async fn modes(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({ "modes": state.settings.modes() }))
}

async fn search(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let mode = state.mode_or_default(params.mode.as_deref())?;
    if !state.settings.is_mode(&mode) {
        let modes = state.settings.modes();
        return Err(ServiceError::unknown_mode(&mode, modes.iter().map(String::as_str)).into());
    }
    let profile = state.settings.profile(&mode)?;
    let format: OutputFormat = params.format.as_deref().unwrap_or_default().parse()?;
    let requested = split_list(params.subtypes.as_deref());
    let mut word = params.q.as_deref().map(str::trim).unwrap_or_default().to_string();
    let contains = flag(params.contains.as_deref());
    let lang = params
        .lang
        .as_deref()
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .unwrap_or(profile.source_language.as_str());
    if !profile.supports_language(lang) {
        return Err(ServiceError::Query(format!(
            "Unknown language: {lang}. Available: {}",
            profile.languages.join(", ")
        ))
        .into());
    }
    let size = page_size(format, parse_size(params.size.as_deref())?, profile);

    let subtypes = state.store.filter_public(&requested, &mode)?;
    debug!(%mode, ?subtypes, %word, contains, %lang, %format, size, "searching");
    if subtypes.is_empty() {
        warn!(%mode, ?requested, "no public subtypes");
        return Err(ServiceError::Query(format!(
            "Subtype(s) {} not public",
            requested.join(", ")
        ))
        .into());
    }

    let mut overflow = false;
    if overflow_guard_applies(&word, format) {
        if let Some(letter) = state.karp.limit_query(&subtypes, lang, profile).await? {
            word = letter;
            overflow = true;
        }
    }

    let q = build_query(&word, &subtypes, contains, lang, profile);
    let query = KarpQuery::search(profile, q, size, lang);
    let response = state.karp.search(profile, &query).await?;
    let total = response.total();
    let result = response.into_sources();

    if format == OutputFormat::Html {
        let base = profile
            .public_url
            .clone()
            .unwrap_or_else(|| request_origin(&headers));
        let css = format!(
            "{}/css?mode={}",
            base.trim_end_matches('/'),
            encode_component(&mode)
        );
        let (count, html) = convert::format_posts(&result, &profile.karp_mode, format, &css)?;
        debug!(%mode, count, "rendered html export");
        return Ok(Html(html).into_response());
    }

    debug!(total, size, overflow, "search answered");
    Ok(Json(SearchPayload {
        result,
        overflow: overflow || total > size as u64,
    })
    .into_response())
}

async fn subtypes(
    State(state): State<SharedState>,
    Query(params): Query<SubtypeParams>,
) -> Result<Json<Value>, ApiError> {
    let mode = state.mode_or_default(params.mode.as_deref())?;
    let published = match state.store.list(&mode) {
        Ok(published) => published,
        Err(err) if err.is_configuration() => {
            debug!(%mode, error = %err, "asked for subtypes of an unconfigured mode");
            Vec::new()
        }
        Err(err) => return Err(err.into()),
    };
    if !flag(params.unpublished.as_deref()) {
        return Ok(Json(json!({ "subtypes": published })));
    }
    let profile = state.settings.profile(&mode)?;
    let unpublished = state
        .store
        .unpublished(&state.karp, profile, &published)
        .await?;
    Ok(Json(json!({ "published": published, "unpublished": unpublished })))
}

async fn publish(
    State(state): State<SharedState>,
    Path(subtype): Path<String>,
    headers: HeaderMap,
    Query(params): Query<ModeParams>,
) -> Result<Json<PublishPayload>, ApiError> {
    change_publication(&state, subtype, &headers, params, true).await
}

async fn unpublish(
    State(state): State<SharedState>,
    Path(subtype): Path<String>,
    headers: HeaderMap,
    Query(params): Query<ModeParams>,
) -> Result<Json<PublishPayload>, ApiError> {
    change_publication(&state, subtype, &headers, params, false).await
}

async fn change_publication(
    state: &AppState,
    subtype: String,
    headers: &HeaderMap,
    params: ModeParams,
    publish: bool,
) -> Result<Json<PublishPayload>, ApiError> {
    let mode = state.mode_or_default(params.mode.as_deref())?;
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    // Anonymous callers get 401 even for a mode that is misconfigured.
    let user = state.karp.authenticate(authorization).await?;
    let resource = state.settings.resolve_str("resource", &mode)?;
    user.ensure_may_edit(&resource)?;
    let subtypes = if publish {
        state.store.publish(&mode, &subtype)?
    } else {
        state.store.unpublish(&mode, &subtype)?
    };
    info!(%mode, %subtype, publish, "publication changed");
    Ok(Json(PublishPayload {
        subtype,
        publish,
        subtypes,
    }))
}

async fn css(
    State(state): State<SharedState>,
    Query(params): Query<ModeParams>,
) -> Result<Response, ApiError> {
    let mode = state.mode_or_default(params.mode.as_deref())?;
    let url = state.settings.resolve_str("css", &mode)?;
    let stylesheet = state.karp.fetch_css(&url).await?;
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/css"))],
        stylesheet,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ModeParams {
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    mode: Option<String>,
    subtypes: Option<String>,
    q: Option<String>,
    contains: Option<String>,
    lang: Option<String>,
    format: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubtypeParams {
    mode: Option<String>,
    unpublished: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchPayload {
    result: Vec<Value>,
    overflow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PublishPayload {
    subtype: String,
    publish: bool,
    subtypes: Vec<String>,
}

fn flag(value: Option<&str>) -> bool {
    value.is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_size(value: Option<&str>) -> Result<Option<usize>, ServiceError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ServiceError::Query(format!("Invalid size: {value}"))),
    }
}

/// Scheme and host the request was addressed to, as seen through proxies.
fn request_origin(headers: &HeaderMap) -> String {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let scheme = header_str("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = header_str("x-forwarded-host")
        .or_else(|| header_str(header::HOST.as_str()))
        .unwrap_or_else(|| "localhost".to_string());
    format!("{scheme}://{host}")
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}
