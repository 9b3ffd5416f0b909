//! MCP Router Library
//!
//! Protocol-aware gateway in front of a fleet of tool servers: registry
//! discovery, layered health checks, circuit breaking, load balancing, cached
//! backend connections and push sessions.

pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod resilience;
pub mod routing;
pub mod session;

pub use config::schema::RouterConfig;
pub use error::{RouterError, RouterResult};
pub use http::HttpServer;
pub use lifecycle::{Gateway, Shutdown};
pub use routing::RoutingEngine;
