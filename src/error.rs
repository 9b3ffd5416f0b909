//! Router error taxonomy.
//!
//! Every failure the routing path can hit maps to one variant here, and every
//! variant carries a stable numeric code that ends up in the `error.code`
//! field of a [`RoutedResponse`](crate::protocol::RoutedResponse).

use serde::Serialize;
use thiserror::Error;

/// JSON-RPC: malformed request envelope.
pub const CODE_INVALID_REQUEST: i32 = -32600;
/// JSON-RPC: method not supported by the router.
pub const CODE_METHOD_NOT_FOUND: i32 = -32601;
/// JSON-RPC: params missing or of the wrong shape.
pub const CODE_INVALID_PARAMS: i32 = -32602;
pub const CODE_SERVICE_UNAVAILABLE: i32 = 10001;
pub const CODE_CAPABILITY_NOT_FOUND: i32 = 10002;
pub const CODE_CONNECTION: i32 = 10003;
pub const CODE_TIMEOUT: i32 = 10004;
pub const CODE_INVOCATION: i32 = 10005;
pub const CODE_REGISTRY: i32 = 10006;

/// Coarse classification used for metrics labels and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ClientError,
    ServiceUnavailable,
    ConnectionError,
    TimeoutError,
    CapabilityNotFound,
    BackendError,
    RegistryError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ClientError => "client_error",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::TimeoutError => "timeout",
            ErrorKind::CapabilityNotFound => "capability_not_found",
            ErrorKind::BackendError => "backend_error",
            ErrorKind::RegistryError => "registry_error",
        }
    }
}

/// Errors produced while routing a request.
///
/// Cloneable so a single connection-creation failure can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouterError {
    /// The request envelope could not be interpreted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The method is valid JSON-RPC but not something the router forwards.
    #[error("method not supported: {0}")]
    UnsupportedMethod(String),

    /// Required params are missing or malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// No enabled, healthy instance is available.
    #[error("no healthy instances available for service '{0}'")]
    ServiceUnavailable(String),

    /// Connection establishment or transport failure.
    #[error("connection to {backend} failed: {cause}")]
    Connection { backend: String, cause: String },

    /// A stage of the operation exceeded its share of the budget.
    #[error("{stage} timed out after {after_ms} ms")]
    Timeout { stage: &'static str, after_ms: u64 },

    /// Smart routing found no backend offering the capability.
    #[error("no backend offers capability '{0}'")]
    CapabilityNotFound(String),

    /// The backend answered, but with an error.
    #[error("capability '{capability}' failed on {backend}: {cause}")]
    Invocation {
        backend: String,
        capability: String,
        cause: String,
    },

    /// The service registry could not be queried.
    #[error("registry error: {0}")]
    Registry(String),
}

impl RouterError {
    /// Stable numeric code surfaced to callers.
    pub fn code(&self) -> i32 {
        match self {
            RouterError::InvalidRequest(_) => CODE_INVALID_REQUEST,
            RouterError::UnsupportedMethod(_) => CODE_METHOD_NOT_FOUND,
            RouterError::InvalidParams(_) => CODE_INVALID_PARAMS,
            RouterError::ServiceUnavailable(_) => CODE_SERVICE_UNAVAILABLE,
            RouterError::Connection { .. } => CODE_CONNECTION,
            RouterError::Timeout { .. } => CODE_TIMEOUT,
            RouterError::CapabilityNotFound(_) => CODE_CAPABILITY_NOT_FOUND,
            RouterError::Invocation { .. } => CODE_INVOCATION,
            RouterError::Registry(_) => CODE_REGISTRY,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::InvalidRequest(_)
            | RouterError::UnsupportedMethod(_)
            | RouterError::InvalidParams(_) => ErrorKind::ClientError,
            RouterError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            RouterError::Connection { .. } => ErrorKind::ConnectionError,
            RouterError::Timeout { .. } => ErrorKind::TimeoutError,
            RouterError::CapabilityNotFound(_) => ErrorKind::CapabilityNotFound,
            RouterError::Invocation { .. } => ErrorKind::BackendError,
            RouterError::Registry(_) => ErrorKind::RegistryError,
        }
    }

    /// Whether this failure should count against the backend's health.
    ///
    /// Client errors never reach a backend, and a tool-level error means the
    /// backend is alive and answering.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            RouterError::Connection { .. } | RouterError::Timeout { .. }
        )
    }

    /// Convenience constructor for timeouts measured in a `Duration`.
    pub fn timeout(stage: &'static str, after: std::time::Duration) -> Self {
        RouterError::Timeout {
            stage,
            after_ms: after.as_millis() as u64,
        }
    }
}

/// Result type for routing operations.
pub type RouterResult<T> = Result<T, RouterError>;
