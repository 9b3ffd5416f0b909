//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: serving again, but has not yet proven recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open:      consecutive_failures >= open_threshold
//! Open → Half-Open:   first success after the failure streak
//! Half-Open → Closed: successes_since_failure >= close_threshold
//! Half-Open → Open:   failures accumulate to open_threshold again
//! ```
//!
//! Failures that never reach the open threshold leave the circuit closed.
//!
//! # Design Decisions
//! - Per-backend state, per-service manual overrides
//! - State is a pure function of the counters and the trip latch, so concurrent updates never tear it
//! - Fail fast in Open state (no waiting for timeout)

use dashmap::DashMap;
use serde::Serialize;

/// Derived circuit state of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    /// Whether traffic may flow.
    pub fn admits(&self) -> bool {
        !matches!(self, CircuitState::Open)
    }
}

/// Operator override for a whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitOverride {
    ForceOpen,
    ForceClose,
}

/// Counter limits driving the transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub open: u32,
    pub close: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { open: 3, close: 2 }
    }
}

impl Thresholds {
    /// State implied by the counters. `tripped` says the circuit opened
    /// and has not yet closed again.
    pub fn derive(&self, consecutive_failures: u64, tripped: bool, successes_since_failure: u64) -> CircuitState {
        if consecutive_failures >= self.open as u64 {
            CircuitState::Open
        } else if tripped && successes_since_failure < self.close as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Closed
        }
    }
}

/// Holds the thresholds and per-service overrides.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    thresholds: Thresholds,
    overrides: DashMap<String, CircuitOverride>,
}

impl CircuitBreaker {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            overrides: DashMap::new(),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Effective state for a backend of `service` with the given counters.
    pub fn state(
        &self,
        service: &str,
        consecutive_failures: u64,
        tripped: bool,
        successes_since_failure: u64,
    ) -> CircuitState {
        match self.override_for(service) {
            Some(CircuitOverride::ForceOpen) => CircuitState::Open,
            Some(CircuitOverride::ForceClose) => CircuitState::Closed,
            None => self
                .thresholds
                .derive(consecutive_failures, tripped, successes_since_failure),
        }
    }

    pub fn override_for(&self, service: &str) -> Option<CircuitOverride> {
        self.overrides.get(service).map(|o| *o)
    }

    pub fn force_open(&self, service: &str) {
        self.overrides.insert(service.to_string(), CircuitOverride::ForceOpen);
        tracing::warn!(service, "Circuit forced open");
    }

    pub fn force_close(&self, service: &str) {
        self.overrides.insert(service.to_string(), CircuitOverride::ForceClose);
        tracing::warn!(service, "Circuit forced closed");
    }

    /// Drop any override for `service`. Returns whether one existed.
    pub fn clear_override(&self, service: &str) -> bool {
        let removed = self.overrides.remove(service).is_some();
        if removed {
            tracing::info!(service, "Circuit override cleared");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_transitions() {
        let t = Thresholds { open: 3, close: 2 };
        assert_eq!(t.derive(0, false, 0), CircuitState::Closed);
        assert_eq!(t.derive(2, false, 0), CircuitState::Closed);
        assert_eq!(t.derive(3, true, 0), CircuitState::Open);
        assert_eq!(t.derive(0, true, 1), CircuitState::HalfOpen);
        assert_eq!(t.derive(1, true, 0), CircuitState::HalfOpen);
        assert_eq!(t.derive(0, true, 2), CircuitState::Closed);
    }

    #[test]
    fn test_overrides_win_until_cleared() {
        let cb = CircuitBreaker::new(Thresholds::default());
        cb.force_open("svc");
        assert_eq!(cb.state("svc", 0, false, 0), CircuitState::Open);
        assert_eq!(cb.state("other", 0, false, 0), CircuitState::Closed);

        cb.force_close("svc");
        assert_eq!(cb.state("svc", 10, true, 0), CircuitState::Closed);

        assert!(cb.clear_override("svc"));
        assert!(!cb.clear_override("svc"));
        assert_eq!(cb.state("svc", 10, true, 0), CircuitState::Open);
    }
}
