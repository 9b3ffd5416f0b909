//! Backend connection cache.
//!
//! # Data Flow
//! ```text
//! RoutingEngine / HealthEngine
//!     → ConnectionManager::get_or_create(instance)
//!         - Ready slot: return cached connection (no I/O)
//!         - Pending slot: await the shared creation future
//!         - Vacant: spawn creation, store Pending, await it
//!     → BackendClient::invoke / list_capabilities / ping
//!     → transport failure: slot evicted, handle closed
//!
//! Reaper (every reap interval):
//!     → close connections idle or older than their limits
//! ```
//!
//! # Design Decisions
//! - At most one initialized connection per backend key
//! - Creation runs in its own task so an abandoned caller never cancels it
//! - Map guards are never held across an await

pub mod manager;

pub use manager::{CachedConnection, ConnectionManager, PoolStats};
