//! In-memory registry seeded from configuration.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::config::schema::RegistryConfig;
use crate::registry::{backend_key, BackendInstance, RegistryError, ServiceChange, ServiceRegistry};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

type ServiceId = (String, String);

/// Registry whose contents are whatever was declared or registered at runtime.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    /// (group, service) -> instances.
    services: DashMap<ServiceId, Vec<BackendInstance>>,
    channels: DashMap<ServiceId, broadcast::Sender<ServiceChange>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        let registry = Self::new();
        for service in &config.services {
            for inst in &service.instances {
                registry.register(BackendInstance {
                    service: service.name.clone(),
                    group: service.group.clone(),
                    host: inst.host.clone(),
                    port: inst.port,
                    weight: inst.weight,
                    enabled: inst.enabled,
                    healthy: inst.healthy,
                    metadata: inst.metadata.clone(),
                });
            }
        }
        registry
    }

    /// Add an instance, replacing any previous one with the same host and port.
    ///
    /// Backend keys ignore the group, so an address already registered for
    /// the same service in another group is refused. Returns whether the
    /// instance was stored.
    pub fn register(&self, instance: BackendInstance) -> bool {
        let claimed = self.services.iter().any(|e| {
            e.key().0 != instance.group
                && e.key().1 == instance.service
                && e.value().iter().any(|i| i.host == instance.host && i.port == instance.port)
        });
        if claimed {
            tracing::warn!(
                backend = %instance.key(),
                group = %instance.group,
                "Instance already registered in another group, ignoring"
            );
            return false;
        }
        let id = (instance.group.clone(), instance.service.clone());
        let snapshot = {
            let mut entry = self.services.entry(id.clone()).or_default();
            entry.retain(|i| !(i.host == instance.host && i.port == instance.port));
            tracing::debug!(backend = %instance.key(), "Instance registered");
            entry.push(instance);
            entry.clone()
        };
        self.publish(id, snapshot);
        true
    }

    /// Remove an instance. Returns whether it was present.
    pub fn deregister(&self, service: &str, group: &str, host: &str, port: u16) -> bool {
        let id = (group.to_string(), service.to_string());
        let snapshot = match self.services.get_mut(&id) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|i| !(i.host == host && i.port == port));
                if entry.len() == before {
                    return false;
                }
                entry.clone()
            }
            None => return false,
        };
        tracing::debug!(backend = %backend_key(service, host, port), "Instance deregistered");
        self.publish(id, snapshot);
        true
    }

    fn publish(&self, id: ServiceId, instances: Vec<BackendInstance>) {
        if let Some(tx) = self.channels.get(&id) {
            // No receivers is fine.
            let _ = tx.send(ServiceChange {
                group: id.0.clone(),
                service: id.1.clone(),
                instances,
            });
        }
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn list_instances(
        &self,
        service: &str,
        group: &str,
    ) -> Result<Vec<BackendInstance>, RegistryError> {
        Ok(self
            .services
            .get(&(group.to_string(), service.to_string()))
            .map(|e| e.clone())
            .unwrap_or_default())
    }

    async fn list_services(&self, group: &str) -> Result<Vec<String>, RegistryError> {
        let mut names: Vec<String> = self
            .services
            .iter()
            .filter(|e| e.key().0 == group && !e.value().is_empty())
            .map(|e| e.key().1.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn subscribe(&self, service: &str, group: &str) -> broadcast::Receiver<ServiceChange> {
        self.channels
            .entry((group.to_string(), service.to_string()))
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    async fn set_instance_health(
        &self,
        service: &str,
        group: &str,
        host: &str,
        port: u16,
        healthy: bool,
        enabled: bool,
    ) -> Result<(), RegistryError> {
        let id = (group.to_string(), service.to_string());
        let snapshot = {
            let mut entry = self
                .services
                .get_mut(&id)
                .ok_or_else(|| RegistryError::InstanceNotFound(backend_key(service, host, port)))?;
            let inst = entry
                .iter_mut()
                .find(|i| i.host == host && i.port == port)
                .ok_or_else(|| RegistryError::InstanceNotFound(backend_key(service, host, port)))?;
            if inst.healthy == healthy && inst.enabled == enabled {
                return Ok(());
            }
            inst.healthy = healthy;
            inst.enabled = enabled;
            entry.clone()
        };
        self.publish(id, snapshot);
        Ok(())
    }
}
