//! Push sessions: long-lived server-to-client event channels.
//!
//! # Data Flow
//! ```text
//! connect(client) → PushSession (CONNECTING → CONNECTED) → "connected" event
//!     heartbeat task  → "heartbeat" every interval while CONNECTED
//!     send/broadcast  → named events onto the bounded channel
//!     route_to_session → RoutingEngine → "response" event
//!     close / sweep   → "disconnected", channel completes (DISCONNECTED | TIMEOUT)
//! ```

pub mod manager;
pub mod push;

pub use manager::SessionManager;
pub use push::{PushEvent, PushSession, SessionError, SessionSnapshot, SessionState, SessionStream};
