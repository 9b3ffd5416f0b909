//! Registry change watcher.
//!
//! # Responsibilities
//! - Subscribe to every service in the configured groups
//! - Pick up services that appear later (periodic rescan)
//! - Close cached connections of instances that vanished or were disabled
//! - Drop their load balancer stats

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant};

use crate::connection::ConnectionManager;
use crate::load_balancer::LoadBalancerService;
use crate::registry::{ServiceChange, ServiceRegistry};

pub struct RegistryWatcher {
    registry: Arc<dyn ServiceRegistry>,
    connections: Arc<ConnectionManager>,
    balancer: Arc<LoadBalancerService>,
    groups: Vec<String>,
    rescan_interval: Duration,
}

impl RegistryWatcher {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        connections: Arc<ConnectionManager>,
        balancer: Arc<LoadBalancerService>,
        groups: Vec<String>,
        rescan_interval: Duration,
    ) -> Self {
        Self {
            registry,
            connections,
            balancer,
            groups,
            rescan_interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let (change_tx, mut change_rx) = mpsc::unbounded_channel::<ServiceChange>();
        let mut subscribed: HashSet<(String, String)> = HashSet::new();
        // (group, service) -> live instance keys from the previous snapshot
        let mut known: HashMap<(String, String), HashSet<String>> = HashMap::new();

        // Forwarders get their own receivers cloned from this one.
        let forwarder_shutdown = shutdown.resubscribe();
        self.subscribe_new(&mut subscribed, &mut known, &change_tx, &forwarder_shutdown).await;
        let mut rescan = time::interval_at(Instant::now() + self.rescan_interval, self.rescan_interval);

        tracing::info!(groups = ?self.groups, services = subscribed.len(), "Registry watcher started");
        loop {
            tokio::select! {
                Some(change) = change_rx.recv() => {
                    self.apply(change, &mut known).await;
                }
                _ = rescan.tick() => {
                    self.subscribe_new(&mut subscribed, &mut known, &change_tx, &forwarder_shutdown).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Registry watcher received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn subscribe_new(
        &self,
        subscribed: &mut HashSet<(String, String)>,
        known: &mut HashMap<(String, String), HashSet<String>>,
        change_tx: &mpsc::UnboundedSender<ServiceChange>,
        shutdown: &broadcast::Receiver<()>,
    ) {
        for group in &self.groups {
            let services = match self.registry.list_services(group).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(group = %group, error = %e, "Registry scan failed");
                    continue;
                }
            };
            for service in services {
                let id = (group.clone(), service.clone());
                if !subscribed.insert(id.clone()) {
                    continue;
                }
                if let Ok(instances) = self.registry.list_instances(&service, group).await {
                    known.insert(
                        id,
                        instances.iter().filter(|i| i.enabled).map(|i| i.key()).collect(),
                    );
                }
                let rx = self.registry.subscribe(&service, group);
                tokio::spawn(forward_changes(rx, change_tx.clone(), shutdown.resubscribe()));
                tracing::debug!(service = %service, group = %group, "Subscribed to registry changes");
            }
        }
    }

    async fn apply(&self, change: ServiceChange, known: &mut HashMap<(String, String), HashSet<String>>) {
        let live: HashSet<String> = change
            .instances
            .iter()
            .filter(|i| i.enabled)
            .map(|i| i.key())
            .collect();
        let previous = known
            .insert((change.group.clone(), change.service.clone()), live.clone())
            .unwrap_or_default();

        for key in previous.difference(&live) {
            tracing::info!(backend = %key, service = %change.service, "Instance left the registry, closing connection");
            self.connections.close(key).await;
            self.balancer.forget(key);
        }
    }
}

async fn forward_changes(
    mut rx: broadcast::Receiver<ServiceChange>,
    tx: mpsc::UnboundedSender<ServiceChange>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            change = rx.recv() => match change {
                Ok(change) => {
                    if tx.send(change).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Registry subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}
