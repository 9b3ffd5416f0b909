//! JSON-RPC envelopes seen by the router.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::RouterError;

pub const JSONRPC_VERSION: &str = "2.0";

/// The only method the router forwards to backends.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Raw JSON-RPC request as received from a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterMessage {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RouterMessage {
    /// A `tools/call` request for `name` with the given arguments.
    pub fn invoke(name: &str, arguments: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(Value::String(uuid::Uuid::new_v4().to_string())),
            method: METHOD_TOOLS_CALL.to_string(),
            params: Some(json!({ "name": name, "arguments": arguments })),
        }
    }
}

/// Operations the router knows how to route.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterRequest {
    InvokeCapability { name: String, arguments: Value },
}

impl RouterRequest {
    pub fn capability(&self) -> &str {
        match self {
            RouterRequest::InvokeCapability { name, .. } => name,
        }
    }
}

impl TryFrom<&RouterMessage> for RouterRequest {
    type Error = RouterError;

    fn try_from(msg: &RouterMessage) -> Result<Self, Self::Error> {
        if msg.jsonrpc != JSONRPC_VERSION {
            return Err(RouterError::InvalidRequest(format!(
                "unsupported jsonrpc version '{}'",
                msg.jsonrpc
            )));
        }
        match msg.method.as_str() {
            "" => Err(RouterError::InvalidRequest("method is required".into())),
            METHOD_TOOLS_CALL => {
                let params = msg.params.as_ref().and_then(Value::as_object).ok_or_else(|| {
                    RouterError::InvalidParams("params must be an object".into())
                })?;
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| RouterError::InvalidParams("missing tool name".into()))?;
                let arguments = match params.get("arguments") {
                    None | Some(Value::Null) => json!({}),
                    Some(args @ Value::Object(_)) => args.clone(),
                    Some(_) => {
                        return Err(RouterError::InvalidParams(
                            "arguments must be an object".into(),
                        ))
                    }
                };
                Ok(RouterRequest::InvokeCapability {
                    name: name.to_string(),
                    arguments,
                })
            }
            other => Err(RouterError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Structured error carried in a [`RoutedResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&RouterError> for ErrorBody {
    fn from(err: &RouterError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: Some(json!({ "kind": err.kind() })),
        }
    }
}

/// Where and how a request was routed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingMetadata {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub elapsed_ms: u64,
}

/// Response envelope returned for every routed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub metadata: RoutingMetadata,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl RoutedResponse {
    pub fn success(id: Option<Value>, result: Value, metadata: RoutingMetadata) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
            metadata,
            timestamp: now_millis(),
        }
    }

    pub fn failure(id: Option<Value>, err: &RouterError, metadata: RoutingMetadata) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(ErrorBody::from(err)),
            metadata,
            timestamp: now_millis(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
