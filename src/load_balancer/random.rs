//! Uniform random selection.

use crate::load_balancer::{LoadBalancer, StatsTable};
use crate::registry::BackendInstance;

#[derive(Debug, Default)]
pub struct RandomPick;

impl LoadBalancer for RandomPick {
    fn next_server<'a>(
        &self,
        candidates: &'a [BackendInstance],
        _stats: &StatsTable,
    ) -> Option<&'a BackendInstance> {
        if candidates.is_empty() {
            return None;
        }
        candidates.get(fastrand::usize(..candidates.len()))
    }
}
