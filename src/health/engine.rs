//! Layered health engine.
//!
//! # Responsibilities
//! - Own one [`HealthRecord`] per backend key
//! - Run the two-level check for a single instance, a service, or everything tracked
//! - Mirror health transitions back into the registry
//! - Purge records nobody has looked at for a while

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::schema::HealthConfig;
use crate::connection::ConnectionManager;
use crate::error::{RouterError, RouterResult};
use crate::health::state::{HealthRecord, HealthSnapshot, HealthStats};
use crate::observability::events::{EventSink, RouterEvent};
use crate::observability::metrics;
use crate::protocol::message::now_millis;
use crate::registry::{BackendInstance, ServiceRegistry};
use crate::resilience::{CircuitBreaker, CircuitState, Deadline, Thresholds};

/// Deepest level a check reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckLevel {
    Registry,
    Protocol,
}

impl CheckLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckLevel::Registry => "registry",
            CheckLevel::Protocol => "protocol",
        }
    }
}

/// Result of one health check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub backend: String,
    pub service: String,
    pub healthy: bool,
    pub level: CheckLevel,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

pub struct HealthEngine {
    records: DashMap<String, Arc<HealthRecord>>,
    /// Instances that have seen traffic or checks, re-checked every sweep.
    tracked: DashMap<String, BackendInstance>,
    registry: Arc<dyn ServiceRegistry>,
    connections: Arc<ConnectionManager>,
    breaker: CircuitBreaker,
    events: Arc<dyn EventSink>,
    groups: Vec<String>,
    config: HealthConfig,
}

impl HealthEngine {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        connections: Arc<ConnectionManager>,
        events: Arc<dyn EventSink>,
        groups: Vec<String>,
        config: HealthConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(Thresholds {
            open: config.open_threshold,
            close: config.close_threshold,
        });
        Self {
            records: DashMap::new(),
            tracked: DashMap::new(),
            registry,
            connections,
            breaker,
            events,
            groups,
            config,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn record_for(&self, instance: &BackendInstance) -> Arc<HealthRecord> {
        let key = instance.key();
        if let Some(record) = self.records.get(&key) {
            return record.clone();
        }
        self.records
            .entry(key)
            .or_insert_with(|| Arc::new(HealthRecord::new(instance)))
            .clone()
    }

    /// Include `instance` in future sweeps.
    pub fn track(&self, instance: &BackendInstance) {
        self.tracked.insert(instance.key(), instance.clone());
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn record_success(&self, instance: &BackendInstance) {
        let record = self.record_for(instance);
        let was_healthy = record.is_healthy(self.config.open_threshold);
        record.record_success();
        self.after_update(instance, &record, was_healthy);
    }

    pub fn record_failure(&self, instance: &BackendInstance, cause: &str) {
        let record = self.record_for(instance);
        let was_healthy = record.is_healthy(self.config.open_threshold);
        record.record_failure(cause);
        self.after_update(instance, &record, was_healthy);
    }

    fn after_update(&self, instance: &BackendInstance, record: &Arc<HealthRecord>, was_healthy: bool) {
        record.update_trip(self.breaker.thresholds());
        let healthy = record.is_healthy(self.config.open_threshold);
        metrics::record_backend_health(&record.key, healthy);
        if healthy == was_healthy {
            // A healthy backend still flagged down by an earlier mirror.
            if healthy && record.mirrored_unhealthy() && self.config.mirror_to_registry {
                self.mirror(instance, record.clone(), true);
            }
            return;
        }
        if healthy {
            tracing::info!(backend = %record.key, "Backend recovered");
        } else {
            tracing::warn!(
                backend = %record.key,
                consecutive_failures = record.counters().consecutive_failures,
                error = record.last_error().as_deref().unwrap_or("-"),
                "Backend marked unhealthy"
            );
        }
        if self.config.mirror_to_registry {
            self.mirror(instance, record.clone(), healthy);
        }
    }

    /// Write the new health flag into the registry without waiting for it.
    ///
    /// Writes for one backend run one at a time, and a write overtaken by a
    /// newer flip is dropped, so the registry ends on the latest value.
    fn mirror(&self, instance: &BackendInstance, record: Arc<HealthRecord>, healthy: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(backend = %record.key, "No runtime, registry mirror skipped");
            return;
        };
        if !healthy {
            record.set_mirrored_unhealthy(true);
        }
        let seq = record.next_mirror();
        let registry = self.registry.clone();
        let instance = instance.clone();
        runtime.spawn(async move {
            let _gate = record.lock_mirror().await;
            if !record.is_latest_mirror(seq) {
                tracing::debug!(backend = %record.key, healthy, "Superseded registry mirror skipped");
                return;
            }
            let result = registry
                .set_instance_health(
                    &instance.service,
                    &instance.group,
                    &instance.host,
                    instance.port,
                    healthy,
                    instance.enabled,
                )
                .await;
            match result {
                Ok(()) => {
                    if healthy {
                        record.set_mirrored_unhealthy(false);
                    }
                    tracing::debug!(backend = %record.key, healthy, "Registry health updated");
                }
                Err(e) => {
                    tracing::warn!(backend = %record.key, error = %e, "Failed to mirror health into registry");
                }
            }
        });
    }

    /// Effective circuit state, including operator overrides.
    pub fn circuit_state(&self, instance: &BackendInstance) -> CircuitState {
        let counters = self.records.get(&instance.key()).map(|r| r.counters());
        match counters {
            Some(c) => self.breaker.state(
                &instance.service,
                c.consecutive_failures,
                c.tripped,
                c.successes_since_failure,
            ),
            None => self.breaker.state(&instance.service, 0, false, 0),
        }
    }

    /// Whether the circuit lets traffic through to `instance`.
    pub fn is_usable(&self, instance: &BackendInstance) -> bool {
        self.circuit_state(instance).admits()
    }

    /// Run the two-level check against one instance and record the result.
    pub async fn check(&self, instance: &BackendInstance) -> CheckOutcome {
        self.track(instance);
        let started = Instant::now();
        let record = self.record_for(instance);

        // An instance this engine marked unhealthy must still get its deep
        // check, or the registry flag could never flip back.
        let registry_ok = instance.enabled && (instance.healthy || record.mirrored_unhealthy());

        let (level, result) = if registry_ok {
            (CheckLevel::Protocol, self.deep_check(instance).await)
        } else {
            (
                CheckLevel::Registry,
                Err("registry reports instance unavailable".to_string()),
            )
        };

        match &result {
            Ok(()) => self.record_success(instance),
            Err(cause) => self.record_failure(instance, cause),
        }

        let outcome = CheckOutcome {
            backend: instance.key(),
            service: instance.service.clone(),
            healthy: record.is_healthy(self.config.open_threshold),
            level,
            elapsed_ms: started.elapsed().as_millis() as u64,
            error: result.err(),
        };
        metrics::record_health_check(outcome.error.is_none());
        self.events.publish(RouterEvent::HealthChecked {
            backend: outcome.backend.clone(),
            service: outcome.service.clone(),
            healthy: outcome.healthy,
            level: level.as_str(),
            elapsed_ms: outcome.elapsed_ms,
            error: outcome.error.clone(),
            timestamp: now_millis(),
        });
        outcome
    }

    /// Ping first; fall back to listing capabilities. Either passing is enough.
    async fn deep_check(&self, instance: &BackendInstance) -> Result<(), String> {
        let deadline = Deadline::new(self.config.deep_check_timeout());

        let ping_err = match self.connections.ping(instance, deadline.remaining()).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        tracing::debug!(backend = %instance.key(), error = %ping_err, "Ping failed, trying capability listing");

        if deadline.is_expired() {
            return Err(ping_err.to_string());
        }
        match self
            .connections
            .list_capabilities(instance, deadline.remaining())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => Err(format!("ping: {ping_err}; list: {e}")),
        }
    }

    /// Every instance of `service` across the configured groups.
    pub async fn discover(&self, service: &str) -> RouterResult<Vec<BackendInstance>> {
        let mut instances = Vec::new();
        let mut last_err = None;
        let mut any_ok = false;
        for group in &self.groups {
            match self.registry.list_instances(service, group).await {
                Ok(mut found) => {
                    any_ok = true;
                    instances.append(&mut found);
                }
                Err(e) => {
                    tracing::warn!(service, group = %group, error = %e, "Registry lookup failed");
                    last_err = Some(e);
                }
            }
        }
        match (any_ok, last_err) {
            (false, Some(e)) => Err(RouterError::from(e)),
            _ => Ok(instances),
        }
    }

    /// Check every instance of `service` now.
    pub async fn check_service(&self, service: &str) -> RouterResult<Vec<CheckOutcome>> {
        let instances = self.discover(service).await?;
        Ok(join_all(instances.iter().map(|i| self.check(i))).await)
    }

    /// Refresh every tracked instance from the registry and check it.
    pub async fn check_all(&self) -> Vec<CheckOutcome> {
        let services: HashSet<(String, String)> = self
            .tracked
            .iter()
            .map(|e| (e.value().service.clone(), e.value().group.clone()))
            .collect();

        let mut current = Vec::new();
        for (service, group) in services {
            match self.registry.list_instances(&service, &group).await {
                Ok(instances) => {
                    let live: HashSet<String> = instances.iter().map(|i| i.key()).collect();
                    self.tracked
                        .retain(|key, inst| inst.service != service || inst.group != group || live.contains(key));
                    current.extend(instances);
                }
                Err(e) => {
                    tracing::warn!(service = %service, error = %e, "Registry refresh failed, checking last known instances");
                    current.extend(
                        self.tracked
                            .iter()
                            .filter(|t| t.value().service == service && t.value().group == group)
                            .map(|t| t.value().clone()),
                    );
                }
            }
        }

        let outcomes = join_all(current.iter().map(|i| self.check(i))).await;
        let unhealthy = outcomes.iter().filter(|o| !o.healthy).count();
        tracing::debug!(checked = outcomes.len(), unhealthy, "Health sweep finished");
        outcomes
    }

    /// Drop records untouched for longer than the staleness window.
    /// Returns the purged backend keys.
    pub fn purge_stale(&self) -> Vec<String> {
        let stale_after = self.config.stale_after();
        let stale: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.value().since_last_check() > stale_after)
            .map(|r| r.key().clone())
            .collect();
        for key in &stale {
            self.records.remove(key);
            self.tracked.remove(key);
        }
        if !stale.is_empty() {
            tracing::info!(purged = stale.len(), "Stale health records purged");
        }
        stale
    }

    pub fn snapshot(&self, key: &str) -> Option<HealthSnapshot> {
        self.records.get(key).map(|r| self.snapshot_of(r.value()))
    }

    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        let mut all: Vec<_> = self.records.iter().map(|r| self.snapshot_of(r.value())).collect();
        all.sort_by(|a, b| a.backend.cmp(&b.backend));
        all
    }

    fn snapshot_of(&self, record: &HealthRecord) -> HealthSnapshot {
        let c = record.counters();
        HealthSnapshot {
            backend: record.key.clone(),
            service: record.service.clone(),
            healthy: record.is_healthy(self.config.open_threshold),
            circuit: self.breaker.state(
                &record.service,
                c.consecutive_failures,
                c.tripped,
                c.successes_since_failure,
            ),
            success_count: c.successes,
            failure_count: c.failures,
            consecutive_failures: c.consecutive_failures,
            successes_since_failure: c.successes_since_failure,
            last_check_ms_ago: record.since_last_check().as_millis() as u64,
            last_error: record.last_error(),
        }
    }

    pub fn stats(&self) -> HealthStats {
        let total = self.records.len();
        let healthy = self
            .records
            .iter()
            .filter(|r| r.value().is_healthy(self.config.open_threshold))
            .count();
        HealthStats {
            total,
            healthy,
            unhealthy: total - healthy,
            health_ratio: if total == 0 { 1.0 } else { healthy as f64 / total as f64 },
        }
    }

    pub fn open_circuit(&self, service: &str) {
        self.breaker.force_open(service);
    }

    pub fn close_circuit(&self, service: &str) {
        self.breaker.force_close(service);
    }

    /// Clear any override and zero the counters of every backend of `service`.
    pub fn reset_circuit(&self, service: &str) -> usize {
        self.breaker.clear_override(service);
        let mut reset = 0;
        for record in self.records.iter().filter(|r| r.value().service == service) {
            record.value().reset();
            metrics::record_backend_health(&record.value().key, true);
            reset += 1;
        }
        tracing::info!(service, records = reset, "Circuit reset");
        reset
    }
}
