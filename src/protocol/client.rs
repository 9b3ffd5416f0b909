//! Backend protocol client collaborator.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::registry::BackendInstance;

/// An initialized session with one backend instance.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: Uuid,
    /// Backend key this handle was created for.
    pub backend: String,
    pub endpoint: Url,
    /// Session id issued by the server during initialize, if any.
    pub session_id: Option<String>,
    /// `serverInfo` (or the whole initialize result) reported by the backend.
    pub server_info: Value,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    /// The request never produced a usable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON-RPC level error returned by the backend.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The tool ran and reported failure.
    #[error("tool error: {0}")]
    Tool(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ProtocolError {
    /// Whether the connection that produced this error should be discarded.
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport(_) | ProtocolError::Decode(_) | ProtocolError::Timeout(_)
        )
    }
}

/// Operations the router needs from a backend protocol implementation.
///
/// Implementations honour `timeout` themselves; callers additionally bound
/// every call with `tokio::time::timeout`.
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    async fn initialize(
        &self,
        instance: &BackendInstance,
        timeout: Duration,
    ) -> Result<ClientHandle, ProtocolError>;

    async fn invoke(
        &self,
        handle: &ClientHandle,
        capability: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, ProtocolError>;

    async fn list_capabilities(
        &self,
        handle: &ClientHandle,
        timeout: Duration,
    ) -> Result<Vec<String>, ProtocolError>;

    /// Cheapest liveness probe the protocol offers.
    async fn ping(&self, handle: &ClientHandle, timeout: Duration) -> Result<(), ProtocolError>;

    /// Release the handle. Errors are logged, never returned.
    async fn close(&self, handle: &ClientHandle);
}
