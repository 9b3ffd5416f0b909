//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Observe routed call outcomes
//! - Feed them into the same records the active checks use
//!
//! # Design Decisions
//! - Only connection errors and timeouts count as failures
//! - A tool-level error means the backend answered, so it counts as success
//! - Client errors never reached a backend and are ignored

use crate::error::{RouterError, RouterResult};
use crate::health::engine::HealthEngine;
use crate::registry::BackendInstance;

impl HealthEngine {
    /// Record the outcome of a call that was sent to `instance`.
    pub fn observe<T>(&self, instance: &BackendInstance, outcome: &RouterResult<T>) {
        self.track(instance);
        match outcome {
            Ok(_) | Err(RouterError::Invocation { .. }) => self.record_success(instance),
            Err(e) if e.is_backend_failure() => self.record_failure(instance, &e.to_string()),
            Err(_) => {}
        }
    }
}
