//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Routed call:
//!     → timeouts.rs (one Deadline per call; half reserved for connecting)
//!     → circuit_breaker.rs (derive Closed / HalfOpen / Open from health counters,
//!       honour operator overrides per service)
//!     → Open backends are skipped before load balancing
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Circuit state is derived from the health record, never stored twice
//! - Overrides are per service and win over counters until reset

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitOverride, CircuitState, Thresholds};
pub use timeouts::Deadline;
