//! Candidate matching for smart routing.
//!
//! # Responsibilities
//! - Exclude instances that must never be picked (our own service, unusable ones)
//! - Probe candidates in parallel for a capability
//!
//! # Design Decisions
//! - Matchers are pure predicates over a registry snapshot
//! - A failed probe means "does not offer", never an error
//! - Combined with AND semantics; empty combination matches everything

use futures_util::future::join_all;
use std::time::Duration;

use crate::connection::ConnectionManager;
use crate::registry::BackendInstance;

/// Predicate over a backend instance.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    fn matches(&self, instance: &BackendInstance) -> bool;
}

/// Rejects every instance of one service.
#[derive(Debug, Clone)]
pub struct ExcludeService {
    service: String,
}

impl ExcludeService {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Matcher for ExcludeService {
    fn matches(&self, instance: &BackendInstance) -> bool {
        instance.service != self.service
    }
}

/// Accepts instances that are enabled and registry-healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Selectable;

impl Matcher for Selectable {
    fn matches(&self, instance: &BackendInstance) -> bool {
        instance.is_selectable()
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, instance: &BackendInstance) -> bool {
        self.matchers.iter().all(|m| m.matches(instance))
    }
}

/// Capability lists of every candidate that answered in time.
pub async fn collect_capabilities(
    connections: &ConnectionManager,
    candidates: Vec<BackendInstance>,
    timeout: Duration,
) -> Vec<(BackendInstance, Vec<String>)> {
    let probes = candidates.into_iter().map(|instance| async move {
        match connections.list_capabilities(&instance, timeout).await {
            Ok(names) => Some((instance, names)),
            Err(e) => {
                tracing::debug!(backend = %instance.key(), error = %e, "Capability probe failed");
                None
            }
        }
    });
    join_all(probes).await.into_iter().flatten().collect()
}

/// Instances among `candidates` that list `capability`.
pub async fn find_providers(
    connections: &ConnectionManager,
    candidates: Vec<BackendInstance>,
    capability: &str,
    timeout: Duration,
) -> Vec<BackendInstance> {
    collect_capabilities(connections, candidates, timeout)
        .await
        .into_iter()
        .filter(|(_, names)| names.iter().any(|n| n == capability))
        .map(|(instance, _)| instance)
        .collect()
}
