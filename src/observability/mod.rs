//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → events.rs (routing / health events, best effort)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Metrics endpoint (Prometheus scrape)
//!     → Event drain task (log target `router_events`)
//! ```
//!
//! # Design Decisions
//! - Request ID flows from the HTTP layer into routing metadata
//! - Metrics are cheap (atomic increments)
//! - Event publication never blocks or fails the routing path

pub mod events;
pub mod logging;
pub mod metrics;
