//! Weighted random selection.
//!
//! Draws `r` uniformly from `[0, total_weight)` and returns the first instance
//! whose cumulative weight exceeds `r`. Falls back to round robin when no
//! instance carries positive weight.

use rand::Rng;

use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::{LoadBalancer, StatsTable};
use crate::registry::BackendInstance;

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    fallback: RoundRobin,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

fn effective_weight(instance: &BackendInstance) -> f64 {
    if instance.weight.is_finite() && instance.weight > 0.0 {
        instance.weight
    } else {
        0.0
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_server<'a>(
        &self,
        candidates: &'a [BackendInstance],
        _stats: &StatsTable,
    ) -> Option<&'a BackendInstance> {
        let total: f64 = candidates.iter().map(effective_weight).sum();
        if total <= 0.0 {
            return self.fallback.pick(candidates);
        }

        let draw = rand::thread_rng().gen_range(0.0..total);
        let mut cumulative = 0.0;
        for candidate in candidates {
            cumulative += effective_weight(candidate);
            if cumulative > draw {
                return Some(candidate);
            }
        }
        // Float rounding can leave the draw just past the last boundary.
        candidates.iter().rev().find(|c| effective_weight(c) > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_ratio() {
        let lb = WeightedRoundRobin::new();
        let stats = StatsTable::new();
        let backends = vec![
            BackendInstance::new("svc", "h", 1).with_weight(1.0),
            BackendInstance::new("svc", "h", 2).with_weight(3.0),
        ];

        let mut heavy = 0u32;
        let mut light = 0u32;
        for _ in 0..10_000 {
            match lb.next_server(&backends, &stats).unwrap().port {
                1 => light += 1,
                _ => heavy += 1,
            }
        }
        let ratio = heavy as f64 / light as f64;
        assert!((2.5..3.6).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn test_zero_weight_never_chosen() {
        let lb = WeightedRoundRobin::new();
        let stats = StatsTable::new();
        let backends = vec![
            BackendInstance::new("svc", "h", 1).with_weight(0.0),
            BackendInstance::new("svc", "h", 2).with_weight(2.0),
        ];
        for _ in 0..200 {
            assert_eq!(lb.next_server(&backends, &stats).unwrap().port, 2);
        }
    }

    #[test]
    fn test_all_zero_falls_back_to_round_robin() {
        let lb = WeightedRoundRobin::new();
        let stats = StatsTable::new();
        let backends = vec![
            BackendInstance::new("svc", "h", 1).with_weight(0.0),
            BackendInstance::new("svc", "h", 2).with_weight(0.0),
        ];
        let a = lb.next_server(&backends, &stats).unwrap().port;
        let b = lb.next_server(&backends, &stats).unwrap().port;
        assert_ne!(a, b);
    }
}
