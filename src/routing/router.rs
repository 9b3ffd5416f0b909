//! Routing engine: direct, smart and broadcast routing.
//!
//! # Responsibilities
//! - Resolve the target instance for a request
//! - Run the call within one timeout budget
//! - Record every outcome into balancer stats, health records and the event sink
//! - Turn every failure into a structured response
//!
//! # Design Decisions
//! - Immutable collaborators behind `Arc`; only settings are swappable
//! - Fan-out (smart probes, broadcast) is explicit `join_all`

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::schema::RouterConfig;
use crate::connection::ConnectionManager;
use crate::error::{RouterError, RouterResult};
use crate::health::HealthEngine;
use crate::load_balancer::{LoadBalancerService, Strategy};
use crate::observability::events::{EventSink, RouterEvent};
use crate::observability::metrics;
use crate::protocol::message::now_millis;
use crate::protocol::{ErrorBody, RouterMessage, RouterRequest, RoutedResponse, RoutingMetadata};
use crate::registry::{BackendInstance, ServiceRegistry};
use crate::resilience::Deadline;
use crate::routing::matcher::{self, AndMatcher, ExcludeService, Matcher, Selectable};

/// Hot-reloadable routing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingSettings {
    pub strategy: Strategy,
    pub default_timeout: Duration,
    pub broadcast_timeout: Duration,
    pub self_service_name: String,
}

impl RoutingSettings {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            strategy: config.load_balancer.strategy,
            default_timeout: Duration::from_millis(config.routing.default_timeout_ms),
            broadcast_timeout: Duration::from_millis(config.routing.broadcast_timeout_ms),
            self_service_name: config.routing.self_service_name.clone(),
        }
    }
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default())
    }
}

/// Where a request should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Service(String),
    /// Any service offering the requested capability.
    Smart,
}

/// Outcome of a broadcast on one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceOutcome {
    pub backend: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub elapsed_ms: u64,
}

/// Every instance attempted by a broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastReport {
    pub request_id: String,
    pub service: String,
    pub capability: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<InstanceOutcome>,
}

pub struct RoutingEngine {
    registry: Arc<dyn ServiceRegistry>,
    health: Arc<HealthEngine>,
    connections: Arc<ConnectionManager>,
    balancer: Arc<LoadBalancerService>,
    events: Arc<dyn EventSink>,
    groups: Vec<String>,
    settings: ArcSwap<RoutingSettings>,
}

impl RoutingEngine {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        health: Arc<HealthEngine>,
        connections: Arc<ConnectionManager>,
        balancer: Arc<LoadBalancerService>,
        events: Arc<dyn EventSink>,
        groups: Vec<String>,
        settings: RoutingSettings,
    ) -> Self {
        Self {
            registry,
            health,
            connections,
            balancer,
            events,
            groups,
            settings: ArcSwap::from_pointee(settings),
        }
    }

    pub fn health(&self) -> &Arc<HealthEngine> {
        &self.health
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn balancer(&self) -> &Arc<LoadBalancerService> {
        &self.balancer
    }

    pub fn settings(&self) -> Arc<RoutingSettings> {
        self.settings.load_full()
    }

    /// Swap in settings from a reloaded config.
    pub fn apply_config(&self, config: &RouterConfig) {
        let next = RoutingSettings::from_config(config);
        if *self.settings.load_full() != next {
            tracing::info!(
                strategy = %next.strategy,
                default_timeout_ms = next.default_timeout.as_millis() as u64,
                "Routing settings updated"
            );
            self.settings.store(Arc::new(next));
        }
    }

    /// Route to `target` and wrap the outcome.
    pub async fn dispatch(
        &self,
        target: &RouteTarget,
        message: &RouterMessage,
        timeout: Option<Duration>,
    ) -> RoutedResponse {
        match target {
            RouteTarget::Service(service) => self.route(service, message, timeout).await,
            RouteTarget::Smart => self.smart_route(message, timeout).await,
        }
    }

    /// Direct route to one instance of `service`.
    pub async fn route(
        &self,
        service: &str,
        message: &RouterMessage,
        timeout: Option<Duration>,
    ) -> RoutedResponse {
        let started = Instant::now();
        let settings = self.settings.load_full();
        let mut meta = RoutingMetadata {
            request_id: Uuid::new_v4().to_string(),
            target_service: Some(service.to_string()),
            strategy: Some(settings.strategy.as_str().to_string()),
            ..Default::default()
        };

        let request = match RouterRequest::try_from(message) {
            Ok(r) => r,
            Err(e) => return self.respond(message, None, Err(e), meta, started),
        };
        let deadline = Deadline::new(timeout.unwrap_or(settings.default_timeout));

        let candidates = match deadline.run("discover", self.usable_instances(service)).await {
            Ok(c) => c,
            Err(e) => return self.respond(message, Some(&request), Err(e), meta, started),
        };
        let Some(instance) = self.balancer.select(settings.strategy, &candidates) else {
            let err = RouterError::ServiceUnavailable(service.to_string());
            return self.respond(message, Some(&request), Err(err), meta, started);
        };

        meta.backend = Some(instance.key());
        let result = self.invoke_on(&instance, &request, &deadline).await;
        self.respond(message, Some(&request), result, meta, started)
    }

    /// Route to any instance of any service offering the capability.
    pub async fn smart_route(&self, message: &RouterMessage, timeout: Option<Duration>) -> RoutedResponse {
        let started = Instant::now();
        let settings = self.settings.load_full();
        let mut meta = RoutingMetadata {
            request_id: Uuid::new_v4().to_string(),
            strategy: Some(settings.strategy.as_str().to_string()),
            ..Default::default()
        };

        let request = match RouterRequest::try_from(message) {
            Ok(r) => r,
            Err(e) => return self.respond(message, None, Err(e), meta, started),
        };
        let deadline = Deadline::new(timeout.unwrap_or(settings.default_timeout));
        let capability = request.capability().to_string();

        let candidates = match deadline
            .run("discover", self.smart_candidates(&settings.self_service_name))
            .await
        {
            Ok(c) => c,
            Err(e) => return self.respond(message, Some(&request), Err(e), meta, started),
        };
        let providers = matcher::find_providers(
            &self.connections,
            candidates,
            &capability,
            deadline.connect_budget(),
        )
        .await;
        tracing::debug!(capability = %capability, providers = providers.len(), "Smart route probe finished");

        let Some(instance) = self.balancer.select(settings.strategy, &providers) else {
            let err = RouterError::CapabilityNotFound(capability);
            return self.respond(message, Some(&request), Err(err), meta, started);
        };

        meta.target_service = Some(instance.service.clone());
        meta.backend = Some(instance.key());
        let result = self.invoke_on(&instance, &request, &deadline).await;
        self.respond(message, Some(&request), result, meta, started)
    }

    /// Send the same call to every usable instance of `service`.
    ///
    /// Fails only when the request is invalid or no instance is usable;
    /// per-instance failures are reported, not propagated.
    pub async fn broadcast(&self, service: &str, message: &RouterMessage) -> RouterResult<BroadcastReport> {
        let broadcast_timeout = self.settings.load().broadcast_timeout;
        let request = RouterRequest::try_from(message)?;
        let instances: Vec<BackendInstance> = self
            .usable_instances(service)
            .await?
            .into_iter()
            .filter(BackendInstance::is_selectable)
            .collect();
        if instances.is_empty() {
            return Err(RouterError::ServiceUnavailable(service.to_string()));
        }

        let request_id = Uuid::new_v4().to_string();
        let calls = instances.iter().map(|instance| {
            let request = &request;
            let request_id = &request_id;
            async move {
                let started = Instant::now();
                let deadline = Deadline::new(broadcast_timeout);
                let result = self.invoke_on(instance, request, &deadline).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                if let Err(e) = &result {
                    tracing::warn!(backend = %instance.key(), error = %e, "Broadcast call failed");
                }
                self.events.publish(RouterEvent::RoutingCompleted {
                    request_id: request_id.clone(),
                    service: Some(service.to_string()),
                    backend: Some(instance.key()),
                    capability: request.capability().to_string(),
                    strategy: "broadcast".to_string(),
                    success: result.is_ok(),
                    error_code: result.as_ref().err().map(RouterError::code),
                    elapsed_ms,
                    timestamp: now_millis(),
                });
                match result {
                    Ok(value) => InstanceOutcome {
                        backend: instance.key(),
                        success: true,
                        result: Some(value),
                        error: None,
                        elapsed_ms,
                    },
                    Err(e) => InstanceOutcome {
                        backend: instance.key(),
                        success: false,
                        result: None,
                        error: Some(ErrorBody::from(&e)),
                        elapsed_ms,
                    },
                }
            }
        });
        let outcomes = join_all(calls).await;

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let report = BroadcastReport {
            request_id,
            service: service.to_string(),
            capability: request.capability().to_string(),
            attempted: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            outcomes,
        };
        tracing::info!(
            service,
            attempted = report.attempted,
            succeeded = report.succeeded,
            "Broadcast completed"
        );
        Ok(report)
    }

    /// Capability names offered by `service`, read from one selectable instance.
    pub async fn capabilities(&self, service: &str) -> RouterResult<Vec<String>> {
        let settings = self.settings.load_full();
        let instance = self
            .usable_instances(service)
            .await?
            .into_iter()
            .find(BackendInstance::is_selectable)
            .ok_or_else(|| RouterError::ServiceUnavailable(service.to_string()))?;
        let mut names = self
            .connections
            .list_capabilities(&instance, settings.default_timeout)
            .await?;
        names.sort();
        names.dedup();
        tracing::debug!(service, backend = %instance.key(), capabilities = names.len(), "Listed capabilities");
        Ok(names)
    }

    /// Whether `service` offers `capability`. Any failure counts as no.
    pub async fn has_capability(&self, service: &str, capability: &str) -> bool {
        match self.capabilities(service).await {
            Ok(names) => names.iter().any(|n| n == capability),
            Err(e) => {
                tracing::debug!(service, capability, error = %e, "Capability lookup failed");
                false
            }
        }
    }

    /// Services, other than this router, with an instance offering `capability`.
    pub async fn providers_for(&self, capability: &str) -> RouterResult<Vec<String>> {
        let settings = self.settings.load_full();
        let candidates = self.smart_candidates(&settings.self_service_name).await?;
        let providers =
            matcher::find_providers(&self.connections, candidates, capability, settings.default_timeout).await;
        let services: BTreeSet<String> = providers.into_iter().map(|i| i.service).collect();
        tracing::debug!(capability, providers = services.len(), "Capability providers resolved");
        Ok(services.into_iter().collect())
    }

    /// Every capability reachable through smart routing, with the services offering it.
    pub async fn available_capabilities(&self) -> RouterResult<BTreeMap<String, Vec<String>>> {
        let settings = self.settings.load_full();
        let candidates = self.smart_candidates(&settings.self_service_name).await?;
        let listings =
            matcher::collect_capabilities(&self.connections, candidates, settings.default_timeout).await;

        let mut catalog: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (instance, names) in listings {
            for name in names {
                catalog.entry(name).or_default().insert(instance.service.clone());
            }
        }
        tracing::info!(capabilities = catalog.len(), "Capability catalog built");
        Ok(catalog
            .into_iter()
            .map(|(name, services)| (name, services.into_iter().collect()))
            .collect())
    }

    /// Instances of `service` whose circuit admits traffic.
    async fn usable_instances(&self, service: &str) -> RouterResult<Vec<BackendInstance>> {
        let instances = self.health.discover(service).await?;
        Ok(instances
            .into_iter()
            .filter(|i| self.health.is_usable(i))
            .collect())
    }

    /// Usable instances of every service except `self_service`.
    async fn smart_candidates(&self, self_service: &str) -> RouterResult<Vec<BackendInstance>> {
        let filter = AndMatcher::new(vec![
            Box::new(ExcludeService::new(self_service)),
            Box::new(Selectable),
        ]);
        let mut services = Vec::new();
        for group in &self.groups {
            let mut names = self.registry.list_services(group).await?;
            services.append(&mut names);
        }
        services.sort();
        services.dedup();

        let mut candidates = Vec::new();
        for service in services.iter().filter(|s| s.as_str() != self_service) {
            match self.usable_instances(service).await {
                Ok(found) => candidates.extend(found.into_iter().filter(|i| filter.matches(i))),
                Err(e) => tracing::warn!(service = %service, error = %e, "Skipping service during smart route"),
            }
        }
        Ok(candidates)
    }

    /// Invoke on one instance within `deadline`, recording the outcome.
    async fn invoke_on(
        &self,
        instance: &BackendInstance,
        request: &RouterRequest,
        deadline: &Deadline,
    ) -> RouterResult<Value> {
        let key = instance.key();
        let _in_flight = self.balancer.begin_call(&key);
        let started = Instant::now();

        let RouterRequest::InvokeCapability { name, arguments } = request;
        let result = if deadline.is_expired() {
            Err(RouterError::timeout("invoke", deadline.elapsed()))
        } else {
            self.connections
                .invoke(
                    instance,
                    name,
                    arguments.clone(),
                    deadline.connect_budget(),
                    deadline.expires_at(),
                )
                .await
        };

        let elapsed = started.elapsed();
        match &result {
            Ok(_) => self.balancer.record_success(&key, elapsed),
            Err(_) => self.balancer.record_failure(&key, elapsed),
        }
        self.health.observe(instance, &result);
        result
    }

    fn respond(
        &self,
        message: &RouterMessage,
        request: Option<&RouterRequest>,
        result: RouterResult<Value>,
        mut meta: RoutingMetadata,
        started: Instant,
    ) -> RoutedResponse {
        let elapsed = started.elapsed();
        meta.elapsed_ms = elapsed.as_millis() as u64;
        let service = meta.target_service.clone();
        let capability = request.map(|r| r.capability().to_string()).unwrap_or_default();

        let (outcome, response) = match result {
            Ok(value) => ("success", RoutedResponse::success(message.id.clone(), value, meta)),
            Err(e) => {
                tracing::warn!(
                    request_id = %meta.request_id,
                    service = service.as_deref().unwrap_or("*"),
                    backend = meta.backend.as_deref().unwrap_or("-"),
                    code = e.code(),
                    error = %e,
                    "Routing failed"
                );
                (e.kind().as_str(), RoutedResponse::failure(message.id.clone(), &e, meta))
            }
        };

        metrics::record_request(service.as_deref().unwrap_or("*"), outcome, elapsed);
        self.events.publish(RouterEvent::RoutingCompleted {
            request_id: response.metadata.request_id.clone(),
            service,
            backend: response.metadata.backend.clone(),
            capability,
            strategy: response.metadata.strategy.clone().unwrap_or_default(),
            success: response.is_success(),
            error_code: response.error_code(),
            elapsed_ms: response.metadata.elapsed_ms,
            timestamp: response.timestamp,
        });
        response
    }
}
