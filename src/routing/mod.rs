//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! RouterMessage (+ target, timeout)
//!     → RouterRequest::try_from (client errors returned without I/O)
//!     → router.rs
//!         direct:    discover(service) → circuit filter → balancer.select
//!         smart:     every service except our own → matcher.rs capability probe
//!                    → balancer.select
//!         broadcast: discover(service) → every usable instance in parallel
//!         discovery: same candidates as smart routing → capability listings
//!     → ConnectionManager::invoke (half the budget reserved for connecting)
//!     → record into balancer stats + health engine, publish event
//!     → RoutedResponse / BroadcastReport
//! ```
//!
//! # Design Decisions
//! - Routing never returns Err for direct or smart calls; failures are data
//! - Outcomes are recorded before the response is built, even on timeout
//! - Settings live in an ArcSwap so config reloads never block a call

pub mod matcher;
pub mod router;

pub use router::{BroadcastReport, InstanceOutcome, RouteTarget, RoutingEngine, RoutingSettings};
