//! Backend protocol: message envelopes and the client collaborator.
//!
//! # Data Flow
//! ```text
//! Caller JSON-RPC body
//!     → message.rs RouterMessage (raw envelope)
//!     → RouterRequest::try_from (resolved once; unknown methods → client error)
//!     → RoutingEngine
//!     → client.rs BackendClient (initialize / invoke / list / ping / close)
//!         - http_client.rs: JSON-RPC over HTTP POST
//!     → message.rs RoutedResponse (result or error + routing metadata)
//! ```
//!
//! # Design Decisions
//! - The method string is inspected in exactly one place
//! - Responses always carry either `result` or `error`, never a transport status alone

pub mod client;
pub mod http_client;
pub mod message;

pub use client::{BackendClient, ClientHandle, ProtocolError};
pub use http_client::HttpBackendClient;
pub use message::{ErrorBody, RouterMessage, RouterRequest, RoutedResponse, RoutingMetadata};
