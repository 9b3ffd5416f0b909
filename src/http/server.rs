//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with all handlers
//! - Wire up middleware (request id, tracing, timeout)
//! - Bind to a listener and shut down gracefully

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::schema::ListenerConfig;
use crate::http::{handlers, sse};
use crate::routing::RoutingEngine;
use crate::session::SessionManager;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RoutingEngine>,
    pub sessions: Arc<SessionManager>,
}

/// Control surface of the router.
pub struct HttpServer {
    router: Router,
    config: ListenerConfig,
}

impl HttpServer {
    pub fn new(state: AppState, config: ListenerConfig) -> Self {
        let router = Self::build_router(state, Duration::from_secs(config.request_timeout_secs));
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
        Router::new()
            .route("/route", post(handlers::smart_route))
            .route("/route/{service}", post(handlers::route_service))
            .route("/broadcast/{service}", post(handlers::broadcast))
            .route("/tools", get(handlers::list_capabilities))
            .route("/tools/{name}/providers", get(handlers::capability_providers))
            .route("/services/{service}/tools", get(handlers::service_capabilities))
            .route("/services/{service}/tools/{name}", get(handlers::service_has_capability))
            .route("/health", get(handlers::health_overview))
            .route("/health/check", post(handlers::trigger_check))
            .route("/health/{key}", get(handlers::health_of))
            .route("/circuit/{service}/{action}", post(handlers::circuit_action))
            .route("/sse", get(sse::connect))
            .route("/sessions", get(handlers::list_sessions))
            .route("/sessions/broadcast", post(handlers::broadcast_to_sessions))
            .route("/sessions/{id}", delete(handlers::close_session))
            .route("/sessions/{id}/messages", post(handlers::send_to_session))
            .route("/sessions/{id}/heartbeat", post(handlers::session_heartbeat))
            .route("/sessions/{id}/route", post(handlers::smart_route_to_session))
            .route("/sessions/{id}/route/{service}", post(handlers::route_to_session))
            .route("/stats", get(handlers::stats))
            .route("/status", get(handlers::status))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(request_timeout)),
            )
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            request_timeout_secs = self.config.request_timeout_secs,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }
}
