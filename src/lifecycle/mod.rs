//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → registry → connections → balancer → events → health → routing → sessions
//!     → background loops → HTTP listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → loops exit → sessions closed → backend connections closed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::Gateway;
