//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! router.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all violations collected)
//!     → RouterConfig (validated, immutable)
//!     → Gateway::from_config hands each section to its subsystem
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → RoutingEngine::apply_config swaps its ArcSwap<RoutingSettings>
//! ```
//!
//! # Design Decisions
//! - Every section has defaults so an empty file is a valid config
//! - Only routing settings hot-reload; listener and registry changes need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ConnectionConfig, HealthConfig, InstanceConfig, RouterConfig, RoutingConfig, ServiceConfig,
    SessionConfig,
};
