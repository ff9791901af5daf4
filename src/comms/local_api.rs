use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::tasks::TaskRegistry;
use crate::config::Settings;
use crate::error::BrokerError;
use crate::operations::protect::{evaluate_risk, RiskEventInput};
use crate::security::CredentialOverride;
use crate::transport::ApiClient;

type SharedState = Arc<AppState>;

// Client IP: left-most X-Forwarded-For entry, then X-Real-IP, then the peer
// address, then 127.0.0.1. The broker is expected to sit behind a proxy.
#[derive(Debug, Clone)]
struct ClientIp(pub String);

fn header_ip(parts: &Parts, name: &str) -> Option<String> {
    let value = parts.headers.get(name)?.to_str().ok()?;
    let ip = value.split(',').next().unwrap_or(value).trim();
    (!ip.is_empty()).then(|| ip.to_string())
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ip) = header_ip(parts, "x-forwarded-for").or_else(|| header_ip(parts, "x-real-ip")) {
            return Ok(ClientIp(ip));
        }

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(ClientIp(addr.ip().to_string()));
        }

        Ok(ClientIp("127.0.0.1".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub client: ApiClient,
    pub settings: Arc<Settings>,
    pub tasks: TaskRegistry,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self, BrokerError> {
        let client = ApiClient::new(&settings)?;
        Ok(Self::with_client(settings, client))
    }

    pub fn with_client(settings: Settings, client: ApiClient) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
            tasks: TaskRegistry::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskDecisionRequest {
    pub ipv4: Option<String>,
    pub env_id: Option<String>,
    pub region: Option<String>,
    pub worker_id: Option<String>,
    pub worker_secret: Option<String>,
    pub username: String,
    pub session_id: Option<String>,
    #[serde(rename = "sdkpayload")]
    pub sdk_payload: Option<Value>,
    #[serde(default)]
    pub remember_device: bool,
}

impl RiskDecisionRequest {
    /// Per-request credential. Fields left out fall back to the process
    /// settings; with no credential fields at all the process credential is
    /// used as is.
    fn credential_override(&self, settings: &Settings) -> Option<CredentialOverride> {
        let any_given = self.env_id.is_some()
            || self.worker_id.is_some()
            || self.worker_secret.is_some()
            || self.region.is_some();
        if !any_given {
            return None;
        }

        Some(CredentialOverride {
            environment_id: self.env_id.clone().or_else(|| settings.environment_id.clone()),
            worker_id: self.worker_id.clone().or_else(|| settings.worker_id.clone()),
            worker_secret: self
                .worker_secret
                .clone()
                .or_else(|| settings.worker_secret.as_ref().map(|s| s.expose_secret().to_string())),
            region: self.region.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardRequest {
    #[serde(flatten)]
    pub credential: CredentialOverride,
    pub iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub message: String,
    #[serde(rename = "taskId")]
    pub task_id: Uuid,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Every failure surfaces as a 500 with a one-line message.
#[derive(Debug)]
struct ApiError(String);

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        ApiError(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: self.0 })).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn risk_decision(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
    payload: Result<Json<RiskDecisionRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let override_credential = req.credential_override(&state.settings);

    let input = RiskEventInput {
        ip: req.ipv4.clone().unwrap_or(client_ip),
        username: req.username.clone(),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        session_id: req.session_id.clone(),
        sdk_payload: req.sdk_payload.clone(),
        remember_device: req.remember_device,
    };
    debug!(username = %input.username, ip = %input.ip, "risk decision requested");

    let decision = evaluate_risk(&state.client, &input, override_credential.as_ref()).await?;
    Ok(Json(decision))
}

async fn generate_dashboard(
    State(state): State<SharedState>,
    payload: Result<Json<DashboardRequest>, JsonRejection>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let Json(req) = payload?;
    // Reject incomplete credentials before anything is spawned.
    state.client.credential(Some(&req.credential))?;

    let iterations = req.iterations.unwrap_or(state.settings.dashboard_iterations);
    let (task_id, _handle) = state
        .tasks
        .spawn_dashboard(state.client.clone(), Some(req.credential), iterations)
        .await;

    Ok(Json(DashboardResponse {
        message: "Dashboard events executing".to_string(),
        task_id,
    }))
}

async fn task_status(State(state): State<SharedState>, Path(id): Path<Uuid>) -> Response {
    match state.tasks.status(&id).await {
        Some(status) => Json(status).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("task {id} not found"),
            }),
        )
            .into_response(),
    }
}

pub fn create_router(state: SharedState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/getRiskDecision", post(risk_decision))
        .route("/generateDashboard", post(generate_dashboard))
        .route("/tasks/{id}", get(task_status));

    if let Some(dir) = state.settings.static_dir.as_deref() {
        debug!(dir, "serving static files");
        router = router.fallback_service(ServeDir::new(dir));
    }

    // Browser clients may be hosted on any origin; the request origin is echoed back.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal(tasks: TaskRegistry) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested, stopping background tasks");
    tasks.cancel_all();
}

pub async fn serve(settings: Settings, port: u16) -> Result<()> {
    let state = Arc::new(AppState::new(settings)?);
    let tasks = state.tasks.clone();

    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(tasks))
        .into_future()
        .await?;
    Ok(())
}
