//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use crate::load_balancer::{LoadBalancer, StatsTable};
use crate::registry::BackendInstance;

/// Round-robin selector.
/// The counter is shared across calls and wraps on overflow.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn pick<'a>(&self, candidates: &'a [BackendInstance]) -> Option<&'a BackendInstance> {
        if candidates.is_empty() {
            return None;
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        candidates.get(n % candidates.len())
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server<'a>(
        &self,
        candidates: &'a [BackendInstance],
        _stats: &StatsTable,
    ) -> Option<&'a BackendInstance> {
        self.pick(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_cycle() {
        let lb = RoundRobin::new();
        let stats = StatsTable::new();
        let backends: Vec<_> = (1..=3).map(|p| BackendInstance::new("svc", "h", p)).collect();

        let picks: Vec<u16> = (0..4)
            .map(|_| lb.next_server(&backends, &stats).unwrap().port)
            .collect();
        assert_eq!(picks, vec![1, 2, 3, 1]);
    }

    #[test]
    fn test_counter_wraps() {
        let lb = RoundRobin { counter: AtomicUsize::new(usize::MAX) };
        let backends: Vec<_> = (1..=2).map(|p| BackendInstance::new("svc", "h", p)).collect();
        assert!(lb.pick(&backends).is_some());
        assert_eq!(lb.pick(&backends).unwrap().port, 1);
    }
}
