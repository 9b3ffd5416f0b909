//! Least Connections load balancing strategy.

use crate::load_balancer::{LoadBalancer, StatsTable};
use crate::registry::BackendInstance;

/// Least connections selector.
/// Selects the instance with the fewest calls in flight.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server<'a>(
        &self,
        candidates: &'a [BackendInstance],
        stats: &StatsTable,
    ) -> Option<&'a BackendInstance> {
        // Ties go to the earlier instance.
        candidates
            .iter()
            .min_by_key(|c| stats.active_calls(&c.key()))
    }
}
