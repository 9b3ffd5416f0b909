//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (health sweep, reaper, registry watcher, sessions, events)
//! - Close every backend connection on the way out
//!
//! # Design Decisions
//! - Subsystems initialize in order, not concurrently
//! - Every background task stops on the shared shutdown broadcast

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::schema::RouterConfig;
use crate::connection::ConnectionManager;
use crate::health::{HealthEngine, HealthMonitor};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::load_balancer::LoadBalancerService;
use crate::observability::events::{self, ChannelSink, RouterEvent};
use crate::protocol::{BackendClient, HttpBackendClient};
use crate::registry::{RegistryWatcher, ServiceRegistry, StaticRegistry};
use crate::routing::{RoutingEngine, RoutingSettings};
use crate::session::SessionManager;

/// Every long-lived component of a running router.
pub struct Gateway {
    pub config: RouterConfig,
    pub registry: Arc<StaticRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub balancer: Arc<LoadBalancerService>,
    pub events: Arc<ChannelSink>,
    pub health: Arc<HealthEngine>,
    pub engine: Arc<RoutingEngine>,
    pub sessions: Arc<SessionManager>,
    pub shutdown: Shutdown,
    event_rx: Option<mpsc::Receiver<RouterEvent>>,
}

impl Gateway {
    /// Assemble a gateway that talks to backends over HTTP.
    pub fn from_config(config: RouterConfig) -> Self {
        let client = HttpBackendClient::new(
            config.connections.client_name.clone(),
            config.connections.client_version.clone(),
        );
        Self::with_client(config, Arc::new(client))
    }

    /// Assemble a gateway around an arbitrary backend client.
    pub fn with_client(config: RouterConfig, client: Arc<dyn BackendClient>) -> Self {
        let groups = config.registry.groups.clone();

        let registry = Arc::new(StaticRegistry::from_config(&config.registry));
        let connections = Arc::new(ConnectionManager::new(client, config.connections.clone()));
        let balancer = Arc::new(LoadBalancerService::default());
        let (sink, event_rx) = ChannelSink::new(config.events.buffer_size);
        let events = Arc::new(sink);

        let health = Arc::new(HealthEngine::new(
            registry.clone() as Arc<dyn ServiceRegistry>,
            connections.clone(),
            events.clone(),
            groups.clone(),
            config.health.clone(),
        ));

        let engine = Arc::new(RoutingEngine::new(
            registry.clone(),
            health.clone(),
            connections.clone(),
            balancer.clone(),
            events.clone(),
            groups,
            RoutingSettings::from_config(&config),
        ));

        let sessions = Arc::new(SessionManager::new(engine.clone(), config.sessions.clone()));

        tracing::info!(
            services = config.registry.services.len(),
            groups = ?config.registry.groups,
            strategy = %config.load_balancer.strategy,
            "Gateway assembled"
        );

        Self {
            config,
            registry,
            connections,
            balancer,
            events,
            health,
            engine,
            sessions,
            shutdown: Shutdown::new(),
            event_rx: Some(event_rx),
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            engine: self.engine.clone(),
            sessions: self.sessions.clone(),
        }
    }

    pub fn http_server(&self) -> HttpServer {
        HttpServer::new(self.app_state(), self.config.listener.clone())
    }

    /// Start every background loop. Calling twice does not start a second event drain.
    pub fn spawn_background(&mut self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        let monitor = HealthMonitor::new(self.health.clone(), self.balancer.clone());
        tasks.push(tokio::spawn(monitor.run(self.shutdown.subscribe())));

        tasks.push(tokio::spawn(
            self.connections.clone().run_reaper(self.shutdown.subscribe()),
        ));

        let watcher = RegistryWatcher::new(
            self.registry.clone(),
            self.connections.clone(),
            self.balancer.clone(),
            self.config.registry.groups.clone(),
            self.config.health.interval(),
        );
        tasks.push(tokio::spawn(watcher.run(self.shutdown.subscribe())));

        tasks.push(tokio::spawn(
            self.sessions.clone().run_sweeper(self.shutdown.subscribe()),
        ));

        if let Some(rx) = self.event_rx.take() {
            tasks.push(tokio::spawn(events::run_event_drain(rx, self.shutdown.subscribe())));
        }

        tracing::info!(tasks = tasks.len(), "Background tasks started");
        tasks
    }

    /// Stop background loops and release backend connections.
    pub async fn shutdown(&self) {
        if !self.shutdown.trigger() {
            tracing::debug!("Shutdown already signalled, releasing resources");
        }
        let sessions = self.sessions.close_all();
        let connections = self.connections.close_all().await;
        tracing::info!(sessions, connections, "Gateway shut down");
    }
}
