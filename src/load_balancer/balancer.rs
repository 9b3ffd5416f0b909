//! Strategy dispatch and per-backend statistics.
//!
//! # Responsibilities
//! - Filter candidates to enabled && healthy before any strategy runs
//! - Dispatch to the requested strategy
//! - Provide call guards and outcome recording for the routing engine

use std::time::Duration;

use crate::load_balancer::{
    fastest::FastestResponse, least_conn::LeastConnections, random::RandomPick,
    round_robin::RoundRobin, weighted::WeightedRoundRobin, BackendStatsSnapshot, CallGuard,
    LoadBalancer, StatsTable, Strategy,
};
use crate::registry::BackendInstance;

/// Owns one instance of every strategy plus the shared stats table.
#[derive(Debug, Default)]
pub struct LoadBalancerService {
    round_robin: RoundRobin,
    random: RandomPick,
    weighted: WeightedRoundRobin,
    least_conn: LeastConnections,
    fastest: FastestResponse,
    stats: StatsTable,
}

impl LoadBalancerService {
    pub fn new() -> Self {
        Self::default()
    }

    fn algorithm(&self, strategy: Strategy) -> &dyn LoadBalancer {
        match strategy {
            Strategy::RoundRobin => &self.round_robin,
            Strategy::Random => &self.random,
            Strategy::WeightedRoundRobin => &self.weighted,
            Strategy::LeastConnections => &self.least_conn,
            Strategy::FastestResponse => &self.fastest,
        }
    }

    /// Select one selectable instance, or `None` if there is none.
    pub fn select(&self, strategy: Strategy, candidates: &[BackendInstance]) -> Option<BackendInstance> {
        let usable: Vec<BackendInstance> = candidates
            .iter()
            .filter(|c| c.is_selectable())
            .cloned()
            .collect();

        match usable.len() {
            0 => {
                tracing::debug!(candidates = candidates.len(), "No selectable instances");
                None
            }
            1 => usable.into_iter().next(),
            _ => self.algorithm(strategy).next_server(&usable, &self.stats).cloned(),
        }
    }

    /// Mark a call as in flight on `key` until the guard drops.
    pub fn begin_call(&self, key: &str) -> CallGuard {
        CallGuard::new(self.stats.entry(key))
    }

    pub fn record_success(&self, key: &str, elapsed: Duration) {
        self.stats.entry(key).record_success(elapsed);
    }

    pub fn record_failure(&self, key: &str, elapsed: Duration) {
        self.stats.entry(key).record_failure(elapsed);
    }

    pub fn stats(&self) -> Vec<BackendStatsSnapshot> {
        self.stats.snapshot()
    }

    /// Drop the stats of a backend that no longer exists.
    pub fn forget(&self, key: &str) {
        self.stats.remove(key);
    }
}
