//! Fastest-response selection.

use crate::load_balancer::{LoadBalancer, StatsTable};
use crate::registry::BackendInstance;

/// Picks the instance with the lowest mean response time.
/// Instances without samples count as fastest so they get measured.
#[derive(Debug, Default)]
pub struct FastestResponse;

impl LoadBalancer for FastestResponse {
    fn next_server<'a>(
        &self,
        candidates: &'a [BackendInstance],
        stats: &StatsTable,
    ) -> Option<&'a BackendInstance> {
        candidates.iter().min_by(|a, b| {
            let ma = stats.get(&a.key()).and_then(|s| s.average_response_ms()).unwrap_or(0.0);
            let mb = stats.get(&b.key()).and_then(|s| s.average_response_ms()).unwrap_or(0.0);
            ma.total_cmp(&mb)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_prefers_unmeasured_then_fastest() {
        let lb = FastestResponse;
        let stats = StatsTable::new();
        let b1 = BackendInstance::new("svc", "h", 1);
        let b2 = BackendInstance::new("svc", "h", 2);
        let backends = vec![b1.clone(), b2.clone()];

        stats.entry(&b1.key()).record_success(Duration::from_millis(50));
        assert_eq!(lb.next_server(&backends, &stats).unwrap().port, 2);

        stats.entry(&b2.key()).record_success(Duration::from_millis(80));
        assert_eq!(lb.next_server(&backends, &stats).unwrap().port, 1);
    }
}
