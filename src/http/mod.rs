//! HTTP control surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, tracing, timeout)
//!     → handlers.rs (route / broadcast / health / circuit / sessions / stats)
//!     → sse.rs (push session as a server-sent event stream)
//!     → RoutingEngine / HealthEngine / SessionManager
//! ```
//!
//! # Design Decisions
//! - Handlers are thin: parse, call one operation, serialize
//! - No authentication; the surface is meant for a trusted network

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{AppState, HttpServer};
