//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds and intervals > 0, ports valid)
//! - Detect duplicate backend declarations
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::RouterConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every violation.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.registry.groups.is_empty() {
        errors.push(ValidationError::new("registry.groups", "at least one group is required"));
    }

    let mut seen = HashSet::new();
    for (i, service) in config.registry.services.iter().enumerate() {
        if service.name.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("registry.services[{i}].name"),
                "must not be empty",
            ));
        }
        for (j, instance) in service.instances.iter().enumerate() {
            let field = format!("registry.services[{i}].instances[{j}]");
            if instance.port == 0 {
                errors.push(ValidationError::new(format!("{field}.port"), "must be > 0"));
            }
            if instance.weight < 0.0 || !instance.weight.is_finite() {
                errors.push(ValidationError::new(
                    format!("{field}.weight"),
                    "must be a finite, non-negative number",
                ));
            }
            // Backend keys carry no group, so this spans groups.
            let key = (service.name.as_str(), instance.host.as_str(), instance.port);
            if !seen.insert(key) {
                errors.push(ValidationError::new(
                    field,
                    format!(
                        "duplicate instance {}:{}:{}",
                        service.name, instance.host, instance.port
                    ),
                ));
            }
        }
    }

    let health = &config.health;
    if health.open_threshold == 0 {
        errors.push(ValidationError::new("health.open_threshold", "must be > 0"));
    }
    if health.close_threshold == 0 {
        errors.push(ValidationError::new("health.close_threshold", "must be > 0"));
    }
    if health.interval_secs == 0 {
        errors.push(ValidationError::new("health.interval_secs", "must be > 0"));
    }
    if health.deep_check_timeout_secs == 0 {
        errors.push(ValidationError::new("health.deep_check_timeout_secs", "must be > 0"));
    }
    if health.purge_interval_secs == 0 {
        errors.push(ValidationError::new("health.purge_interval_secs", "must be > 0"));
    }
    if health.stale_after_secs < health.interval_secs {
        errors.push(ValidationError::new(
            "health.stale_after_secs",
            "must be at least one sweep interval",
        ));
    }

    if config.routing.default_timeout_ms == 0 {
        errors.push(ValidationError::new("routing.default_timeout_ms", "must be > 0"));
    }
    if config.routing.broadcast_timeout_ms == 0 {
        errors.push(ValidationError::new("routing.broadcast_timeout_ms", "must be > 0"));
    }

    if config.connections.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("connections.connect_timeout_secs", "must be > 0"));
    }
    if config.connections.reap_interval_secs == 0 {
        errors.push(ValidationError::new("connections.reap_interval_secs", "must be > 0"));
    }

    let sessions = &config.sessions;
    if sessions.heartbeat_interval_secs == 0 {
        errors.push(ValidationError::new("sessions.heartbeat_interval_secs", "must be > 0"));
    }
    if sessions.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("sessions.sweep_interval_secs", "must be > 0"));
    }
    if sessions.channel_capacity == 0 {
        errors.push(ValidationError::new("sessions.channel_capacity", "must be > 0"));
    }

    if config.events.buffer_size == 0 {
        errors.push(ValidationError::new("events.buffer_size", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address when metrics are enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{InstanceConfig, ServiceConfig};
    use std::collections::HashMap;

    fn instance(port: u16) -> InstanceConfig {
        InstanceConfig {
            host: "127.0.0.1".into(),
            port,
            weight: 1.0,
            enabled: true,
            healthy: true,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&RouterConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = RouterConfig::default();
        config.listener.bind_address = "nope".into();
        config.health.close_threshold = 0;
        config.sessions.channel_capacity = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["listener.bind_address", "health.close_threshold", "sessions.channel_capacity"]
        );
    }

    #[test]
    fn test_duplicate_instances_rejected() {
        let mut config = RouterConfig::default();
        config.registry.services.push(ServiceConfig {
            name: "weather".into(),
            group: "mcp-server".into(),
            instances: vec![instance(9001), instance(9001), instance(0)],
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].field.ends_with("instances[1]"));
        assert!(errors[1].field.ends_with("instances[2].port"));
    }

    #[test]
    fn test_duplicate_instance_across_groups_rejected() {
        let mut config = RouterConfig::default();
        config.registry.groups = vec!["mcp-server".into(), "mcp-edge".into()];
        for group in ["mcp-server", "mcp-edge"] {
            config.registry.services.push(ServiceConfig {
                name: "weather".into(),
                group: group.into(),
                instances: vec![instance(9001)],
            });
        }

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "registry.services[1].instances[0]");
        assert!(errors[0].message.contains("weather:127.0.0.1:9001"));
    }
}
