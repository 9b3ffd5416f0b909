//! Service registry collaborator.
//!
//! # Data Flow
//! ```text
//! RoutingEngine / HealthEngine
//!     → ServiceRegistry::list_instances(service, group)
//!     → Vec<BackendInstance> (fresh snapshot every call)
//!
//! Registry mutation (register / deregister / set_instance_health)
//!     → ServiceChange broadcast to subscribers of that service
//!     → watcher.rs closes connections of vanished or disabled instances
//! ```
//!
//! # Design Decisions
//! - Instances are plain values; nothing downstream holds a reference into the registry
//! - Subscriptions are per (service, group) and deliver the full instance list,
//!   so a subscriber never has to replay deltas

pub mod memory;
pub mod watcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::error::RouterError;

pub use memory::StaticRegistry;
pub use watcher::RegistryWatcher;

/// Metadata key naming the HTTP path of the instance's protocol endpoint.
pub const ENDPOINT_METADATA_KEY: &str = "endpoint";

/// Endpoint path used when an instance declares none.
pub const DEFAULT_ENDPOINT: &str = "/mcp";

/// One running copy of a tool server as reported by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendInstance {
    pub service: String,
    pub group: String,
    pub host: String,
    pub port: u16,
    pub weight: f64,
    pub enabled: bool,
    /// The registry's own liveness flag.
    pub healthy: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl BackendInstance {
    pub fn new(service: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service: service.into(),
            group: "mcp-server".to_string(),
            host: host.into(),
            port,
            weight: 1.0,
            enabled: true,
            healthy: true,
            metadata: HashMap::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Identity shared by health records, connections and balancer stats.
    pub fn key(&self) -> String {
        backend_key(&self.service, &self.host, self.port)
    }

    /// Eligible for load balancing.
    pub fn is_selectable(&self) -> bool {
        self.enabled && self.healthy
    }

    pub fn endpoint_path(&self) -> &str {
        self.metadata
            .get(ENDPOINT_METADATA_KEY)
            .map(String::as_str)
            .unwrap_or(DEFAULT_ENDPOINT)
    }
}

/// `service:host:port`.
pub fn backend_key(service: &str, host: &str, port: u16) -> String {
    format!("{service}:{host}:{port}")
}

/// Full instance list of a service after a registry mutation.
#[derive(Debug, Clone)]
pub struct ServiceChange {
    pub service: String,
    pub group: String,
    pub instances: Vec<BackendInstance>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("instance {0} is not registered")]
    InstanceNotFound(String),
}

impl From<RegistryError> for RouterError {
    fn from(err: RegistryError) -> Self {
        RouterError::Registry(err.to_string())
    }
}

/// Operations the router consumes from a service registry.
#[async_trait]
pub trait ServiceRegistry: Send + Sync + 'static {
    /// Every instance of `service` in `group`, healthy or not.
    async fn list_instances(
        &self,
        service: &str,
        group: &str,
    ) -> Result<Vec<BackendInstance>, RegistryError>;

    /// Names of the services registered in `group`.
    async fn list_services(&self, group: &str) -> Result<Vec<String>, RegistryError>;

    /// Receive the instance list of `service` whenever it changes.
    fn subscribe(&self, service: &str, group: &str) -> broadcast::Receiver<ServiceChange>;

    async fn set_instance_health(
        &self,
        service: &str,
        group: &str,
        host: &str,
        port: u16,
        healthy: bool,
        enabled: bool,
    ) -> Result<(), RegistryError>;
}
