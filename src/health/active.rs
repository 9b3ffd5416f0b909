//! Active health checking.
//!
//! # Responsibilities
//! - Periodically re-check every tracked backend
//! - Periodically purge stale health records and the balancer stats that go with them

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::health::engine::HealthEngine;
use crate::load_balancer::LoadBalancerService;

pub struct HealthMonitor {
    engine: Arc<HealthEngine>,
    balancer: Arc<LoadBalancerService>,
}

impl HealthMonitor {
    pub fn new(engine: Arc<HealthEngine>, balancer: Arc<LoadBalancerService>) -> Self {
        Self { engine, balancer }
    }

    /// Purge stale health records and forget their balancer stats.
    pub fn purge(&self) -> usize {
        let purged = self.engine.purge_stale();
        for key in &purged {
            self.balancer.forget(key);
        }
        purged.len()
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let config = self.engine.config().clone();
        if !config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_secs = config.interval_secs,
            deep_check_timeout_secs = config.deep_check_timeout_secs,
            open_threshold = config.open_threshold,
            close_threshold = config.close_threshold,
            "Health monitor starting"
        );

        let mut sweep = time::interval_at(Instant::now() + config.interval(), config.interval());
        let mut purge = time::interval_at(
            Instant::now() + config.purge_interval(),
            config.purge_interval(),
        );

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    self.engine.check_all().await;
                }
                _ = purge.tick() => {
                    self.purge();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
