//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! RoutingEngine discovers instances for a service
//!     → balancer.rs: filter to enabled && healthy
//!         - none left: None ("no instance available")
//!         - exactly one: returned directly
//!     → Apply the configured strategy:
//!         - round_robin.rs (rotate through instances)
//!         - random.rs (uniform pick)
//!         - weighted.rs (weight-proportional draw)
//!         - least_conn.rs (fewest in-flight calls)
//!         - fastest.rs (lowest average response time)
//!     → begin_call() guard tracks the in-flight count
//!     → record_success / record_failure feed stats.rs
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless apart from their own counters; stats live in the balancer
//! - The strategy is chosen per call so it can be hot-reloaded
//! - Filtering happens before any strategy runs

pub mod balancer;
pub mod fastest;
pub mod least_conn;
pub mod random;
pub mod round_robin;
pub mod stats;
pub mod weighted;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::registry::BackendInstance;

pub use balancer::LoadBalancerService;
pub use stats::{BackendStats, BackendStatsSnapshot, CallGuard, StatsTable};

/// A selection strategy over already-filtered candidates.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Pick one of `candidates`. `candidates` is never empty.
    fn next_server<'a>(
        &self,
        candidates: &'a [BackendInstance],
        stats: &StatsTable,
    ) -> Option<&'a BackendInstance>;
}

/// Configurable balancing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    Random,
    WeightedRoundRobin,
    LeastConnections,
    FastestResponse,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::Random => "random",
            Strategy::WeightedRoundRobin => "weighted_round_robin",
            Strategy::LeastConnections => "least_connections",
            Strategy::FastestResponse => "fastest_response",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
