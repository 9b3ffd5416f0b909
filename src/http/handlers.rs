//! Control-surface handlers.
//!
//! Routed calls always answer 200 with a JSON-RPC style body; the outcome
//! lives in `error`. Management endpoints use HTTP status codes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::connection::PoolStats;
use crate::error::RouterError;
use crate::health::{CheckOutcome, HealthSnapshot, HealthStats};
use crate::http::server::AppState;
use crate::load_balancer::BackendStatsSnapshot;
use crate::protocol::{ErrorBody, RoutedResponse, RouterMessage};
use crate::routing::{BroadcastReport, RouteTarget};
use crate::session::{SessionError, SessionSnapshot};

/// Error response for management endpoints.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn new(status: StatusCode, kind: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": { "kind": kind, "message": message.into() } }),
        }
    }
}

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        let status = match &err {
            RouterError::InvalidRequest(_)
            | RouterError::UnsupportedMethod(_)
            | RouterError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            RouterError::CapabilityNotFound(_) => StatusCode::NOT_FOUND,
            RouterError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RouterError::Connection { .. } | RouterError::Invocation { .. } => StatusCode::BAD_GATEWAY,
            RouterError::ServiceUnavailable(_) | RouterError::Registry(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        Self {
            status,
            body: json!({ "error": ErrorBody::from(&err) }),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let (status, kind) = match &err {
            SessionError::NotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            SessionError::Closed(_) => (StatusCode::GONE, "session_closed"),
            SessionError::Backpressure(_) => (StatusCode::SERVICE_UNAVAILABLE, "backpressure"),
            SessionError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encode"),
        };
        Self::new(status, kind, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeoutQuery {
    pub timeout_ms: Option<u64>,
}

impl TimeoutQuery {
    fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

pub async fn route_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(query): Query<TimeoutQuery>,
    Json(message): Json<RouterMessage>,
) -> Json<RoutedResponse> {
    Json(state.engine.route(&service, &message, query.timeout()).await)
}

pub async fn smart_route(
    State(state): State<AppState>,
    Query(query): Query<TimeoutQuery>,
    Json(message): Json<RouterMessage>,
) -> Json<RoutedResponse> {
    Json(state.engine.smart_route(&message, query.timeout()).await)
}

pub async fn broadcast(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(message): Json<RouterMessage>,
) -> Result<Json<BroadcastReport>, ApiError> {
    Ok(Json(state.engine.broadcast(&service, &message).await?))
}

pub async fn list_capabilities(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let catalog = state.engine.available_capabilities().await?;
    Ok(Json(json!({ "count": catalog.len(), "tools": catalog })))
}

pub async fn capability_providers(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let services = state.engine.providers_for(&name).await?;
    Ok(Json(json!({
        "tool": name,
        "available": !services.is_empty(),
        "services": services,
    })))
}

pub async fn service_capabilities(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let tools = state.engine.capabilities(&service).await?;
    Ok(Json(json!({ "service": service, "tools": tools })))
}

pub async fn service_has_capability(
    State(state): State<AppState>,
    Path((service, name)): Path<(String, String)>,
) -> Json<Value> {
    let available = state.engine.has_capability(&service, &name).await;
    Json(json!({ "service": service, "tool": name, "available": available }))
}

#[derive(Serialize)]
pub struct HealthOverview {
    pub stats: HealthStats,
    pub backends: Vec<HealthSnapshot>,
}

pub async fn health_overview(State(state): State<AppState>) -> Json<HealthOverview> {
    let health = state.engine.health();
    Json(HealthOverview {
        stats: health.stats(),
        backends: health.snapshots(),
    })
}

pub async fn health_of(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<HealthSnapshot>, ApiError> {
    state
        .engine
        .health()
        .snapshot(&key)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "backend_not_found", key))
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    pub service: Option<String>,
}

pub async fn trigger_check(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<Vec<CheckOutcome>>, ApiError> {
    let health = state.engine.health();
    let outcomes = match query.service {
        Some(service) => health.check_service(&service).await?,
        None => health.check_all().await,
    };
    Ok(Json(outcomes))
}

pub async fn circuit_action(
    State(state): State<AppState>,
    Path((service, action)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let health = state.engine.health();
    let affected = match action.as_str() {
        "open" => {
            health.open_circuit(&service);
            0
        }
        "close" => {
            health.close_circuit(&service);
            0
        }
        "reset" => health.reset_circuit(&service),
        other => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "invalid_action",
                format!("unknown circuit action '{other}', expected open, close or reset"),
            ))
        }
    };
    tracing::info!(service = %service, action = %action, affected, "Circuit action applied");
    Ok(Json(json!({ "service": service, "action": action, "reset_records": affected })))
}

#[derive(Debug, Deserialize)]
pub struct EventBody {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventBody {
    /// String payloads pass through as-is; anything else is sent as JSON text.
    fn payload(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.sessions.snapshots())
}

pub async fn send_to_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EventBody>,
) -> Result<StatusCode, ApiError> {
    state.sessions.send_message(&id, &body.event, &body.payload())?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn session_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.sessions.heartbeat(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn broadcast_to_sessions(
    State(state): State<AppState>,
    Json(body): Json<EventBody>,
) -> Json<Value> {
    let delivered = state.sessions.broadcast(&body.event, &body.payload());
    Json(json!({ "delivered": delivered }))
}

pub async fn close_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.sessions.close_session(&id);
    StatusCode::NO_CONTENT
}

pub async fn route_to_session(
    State(state): State<AppState>,
    Path((id, service)): Path<(String, String)>,
    Query(query): Query<TimeoutQuery>,
    Json(message): Json<RouterMessage>,
) -> Result<Json<RoutedResponse>, ApiError> {
    let target = RouteTarget::Service(service);
    let response = state
        .sessions
        .route_to_session(&id, &target, &message, query.timeout())
        .await?;
    Ok(Json(response))
}

pub async fn smart_route_to_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TimeoutQuery>,
    Json(message): Json<RouterMessage>,
) -> Result<Json<RoutedResponse>, ApiError> {
    let response = state
        .sessions
        .route_to_session(&id, &RouteTarget::Smart, &message, query.timeout())
        .await?;
    Ok(Json(response))
}

#[derive(Serialize)]
pub struct RouterStats {
    pub connections: PoolStats,
    pub backends: Vec<BackendStatsSnapshot>,
    pub health: HealthStats,
    pub active_sessions: usize,
}

pub async fn stats(State(state): State<AppState>) -> Json<RouterStats> {
    Json(RouterStats {
        connections: state.engine.connections().stats(),
        backends: state.engine.balancer().stats(),
        health: state.engine.health().stats(),
        active_sessions: state.sessions.active_count(),
    })
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub strategy: String,
    pub tracked_backends: usize,
    pub active_sessions: usize,
}

pub async fn status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        strategy: state.engine.settings().strategy.to_string(),
        tracked_backends: state.engine.health().tracked_count(),
        active_sessions: state.sessions.active_count(),
    })
}
