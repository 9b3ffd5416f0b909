//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → engine.rs check_all()
//!         Level 1: registry liveness flag (no I/O)
//!         Level 2: ping, then tools/list, through the ConnectionManager
//!     → Update state.rs
//!
//! Passive health checks (passive.rs):
//!     Routed call finished
//!     → connection / timeout failure: record_failure
//!     → answered (even with a tool error): record_success
//!
//! State changes:
//!     → metrics gauge, log line
//!     → mirrored into the registry health flag (best effort)
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - Circuit state is derived from the record by resilience::CircuitBreaker
//! - Health state is per backend key, overrides are per service

pub mod active;
pub mod engine;
pub mod passive;
pub mod state;

pub use active::HealthMonitor;
pub use engine::{CheckLevel, CheckOutcome, HealthEngine};
pub use state::{HealthRecord, HealthSnapshot, HealthStats};
