//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::load_balancer::Strategy;

/// Root configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Control-surface listener.
    pub listener: ListenerConfig,

    /// Service registry settings and statically declared services.
    pub registry: RegistryConfig,

    /// Health engine and circuit thresholds.
    pub health: HealthConfig,

    /// Load balancing strategy.
    pub load_balancer: LoadBalancerConfig,

    /// Routing defaults.
    pub routing: RoutingConfig,

    /// Backend connection cache.
    pub connections: ConnectionConfig,

    /// Push sessions.
    pub sessions: SessionConfig,

    /// Routing/health event sink.
    pub events: EventsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8052").
    pub bind_address: String,

    /// Per-request timeout applied by the HTTP layer, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8052".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Service groups searched during discovery, in order.
    pub groups: Vec<String>,

    /// Services known at startup.
    pub services: Vec<ServiceConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            groups: vec!["mcp-server".to_string()],
            services: Vec::new(),
        }
    }
}

/// A statically declared service and its instances.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service name used as the routing target.
    pub name: String,

    /// Group the service is registered under.
    #[serde(default = "default_group")]
    pub group: String,

    /// Instances of this service.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

/// A single backend instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    pub host: String,
    pub port: u16,

    /// Weight for weighted load balancing (default: 1.0).
    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub healthy: bool,

    /// Free-form metadata, e.g. `endpoint = "/mcp"`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_group() -> String {
    "mcp-server".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Health engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Run the periodic sweep.
    pub enabled: bool,

    /// Sweep interval in seconds.
    pub interval_secs: u64,

    /// Deep (protocol) check timeout in seconds.
    pub deep_check_timeout_secs: u64,

    /// Consecutive failures that open the circuit.
    pub open_threshold: u32,

    /// Successes since the last failure that close the circuit again.
    pub close_threshold: u32,

    /// Records untouched for longer than this are purged.
    pub stale_after_secs: u64,

    /// How often the stale purge runs.
    pub purge_interval_secs: u64,

    /// Write health transitions back into the registry.
    pub mirror_to_registry: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            deep_check_timeout_secs: 10,
            open_threshold: 3,
            close_threshold: 2,
            stale_after_secs: 300,
            purge_interval_secs: 60,
            mirror_to_registry: true,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn deep_check_timeout(&self) -> Duration {
        Duration::from_secs(self.deep_check_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub strategy: Strategy,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::WeightedRoundRobin,
        }
    }
}

/// Routing defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Timeout applied when the caller supplies none, in milliseconds.
    pub default_timeout_ms: u64,

    /// Per-instance timeout for broadcast fan-out, in milliseconds.
    pub broadcast_timeout_ms: u64,

    /// The router's own service name, never chosen by smart routing.
    pub self_service_name: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
            broadcast_timeout_ms: 60_000,
            self_service_name: "mcp-router".to_string(),
        }
    }
}

/// Backend connection cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Timeout for the initialize handshake, in seconds.
    pub connect_timeout_secs: u64,

    /// Connections unused for this long are reaped.
    pub idle_timeout_secs: u64,

    /// Connections older than this are reaped regardless of use.
    pub max_lifetime_secs: u64,

    /// How often the reaper runs.
    pub reap_interval_secs: u64,

    /// Client name announced during initialize.
    pub client_name: String,

    /// Client version announced during initialize.
    pub client_version: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 3600,
            reap_interval_secs: 60,
            client_name: "mcp-router-client".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

/// Push session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,

    /// Idle time after which a session is reclaimed, in milliseconds.
    pub session_timeout_ms: u64,

    /// How often the timeout sweep runs, in seconds.
    pub sweep_interval_secs: u64,

    /// Outbound channel capacity per session.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            session_timeout_ms: 60_000,
            sweep_interval_secs: 120,
            channel_capacity: 256,
        }
    }
}

/// Event sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Bounded buffer between the routing path and the event consumer.
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { buffer_size: 10_000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
