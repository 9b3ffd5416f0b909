//! JSON-RPC over HTTP backend client.
//!
//! # Responsibilities
//! - Perform the initialize handshake and keep the issued session id
//! - Translate `tools/call`, `tools/list` and `ping` into POST requests
//! - Accept both `application/json` and `text/event-stream` replies
//! - Normalize tool results into a single JSON value

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::protocol::client::{BackendClient, ClientHandle, ProtocolError};
use crate::registry::BackendInstance;

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Backend client speaking JSON-RPC 2.0 over HTTP POST.
#[derive(Debug)]
pub struct HttpBackendClient {
    http: reqwest::Client,
    client_name: String,
    client_version: String,
    next_id: AtomicU64,
}

impl HttpBackendClient {
    pub fn new(client_name: impl Into<String>, client_version: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_name: client_name.into(),
            client_version: client_version.into(),
            next_id: AtomicU64::new(1),
        }
    }

    fn endpoint(instance: &BackendInstance) -> Result<Url, ProtocolError> {
        let raw = format!("http://{}:{}{}", instance.host, instance.port, instance.endpoint_path());
        Url::parse(&raw).map_err(|e| ProtocolError::Transport(format!("invalid endpoint {raw}: {e}")))
    }

    async fn post(
        &self,
        endpoint: &Url,
        session_id: Option<&str>,
        body: &Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, ProtocolError> {
        let mut req = self
            .http
            .post(endpoint.clone())
            .header("accept", "application/json, text/event-stream")
            .timeout(timeout)
            .json(body);
        if let Some(sid) = session_id {
            req = req.header(SESSION_HEADER, sid);
        }
        let resp = req.send().await.map_err(|e| map_reqwest(e, timeout))?;
        if !resp.status().is_success() {
            return Err(ProtocolError::Transport(format!("HTTP {}", resp.status())));
        }
        Ok(resp)
    }

    async fn rpc(
        &self,
        endpoint: &Url,
        session_id: Option<&str>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<(Value, Option<String>), ProtocolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let resp = self.post(endpoint, session_id, &body, timeout).await?;

        let issued_session = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let text = resp.text().await.map_err(|e| map_reqwest(e, timeout))?;
        let envelope = if is_stream {
            find_stream_response(&text, id)?
        } else {
            serde_json::from_str(&text).map_err(|e| ProtocolError::Decode(e.to_string()))?
        };
        Ok((unwrap_envelope(envelope)?, issued_session))
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn initialize(
        &self,
        instance: &BackendInstance,
        timeout: Duration,
    ) -> Result<ClientHandle, ProtocolError> {
        let endpoint = Self::endpoint(instance)?;
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": self.client_name, "version": self.client_version },
        });
        let (result, session_id) = self.rpc(&endpoint, None, "initialize", params, timeout).await?;

        let notification = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        if let Err(e) = self.post(&endpoint, session_id.as_deref(), &notification, timeout).await {
            tracing::debug!(backend = %instance.key(), error = %e, "initialized notification not accepted");
        }

        let server_info = result.get("serverInfo").cloned().unwrap_or(result);
        tracing::debug!(backend = %instance.key(), endpoint = %endpoint, "Backend session initialized");
        Ok(ClientHandle {
            id: Uuid::new_v4(),
            backend: instance.key(),
            endpoint,
            session_id,
            server_info,
        })
    }

    async fn invoke(
        &self,
        handle: &ClientHandle,
        capability: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, ProtocolError> {
        let params = json!({ "name": capability, "arguments": arguments });
        let (result, _) = self
            .rpc(&handle.endpoint, handle.session_id.as_deref(), "tools/call", params, timeout)
            .await?;
        parse_tool_result(result)
    }

    async fn list_capabilities(
        &self,
        handle: &ClientHandle,
        timeout: Duration,
    ) -> Result<Vec<String>, ProtocolError> {
        let (result, _) = self
            .rpc(&handle.endpoint, handle.session_id.as_deref(), "tools/list", json!({}), timeout)
            .await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| ProtocolError::Decode("tools/list result has no tools array".into()))?;
        Ok(tools
            .iter()
            .filter_map(|t| t.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn ping(&self, handle: &ClientHandle, timeout: Duration) -> Result<(), ProtocolError> {
        self.rpc(&handle.endpoint, handle.session_id.as_deref(), "ping", json!({}), timeout)
            .await
            .map(|_| ())
    }

    async fn close(&self, handle: &ClientHandle) {
        let Some(sid) = handle.session_id.as_deref() else {
            return;
        };
        let result = self
            .http
            .delete(handle.endpoint.clone())
            .header(SESSION_HEADER, sid)
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(backend = %handle.backend, error = %e, "Session delete failed");
        }
    }
}

fn map_reqwest(err: reqwest::Error, timeout: Duration) -> ProtocolError {
    if err.is_timeout() {
        ProtocolError::Timeout(timeout)
    } else {
        ProtocolError::Transport(err.to_string())
    }
}

fn unwrap_envelope(mut envelope: Value) -> Result<Value, ProtocolError> {
    if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
        return Err(ProtocolError::Rpc {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(-32603),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    envelope
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| ProtocolError::Decode("response has neither result nor error".into()))
}

/// Pick the JSON-RPC response with the given id out of an event-stream body.
fn find_stream_response(body: &str, id: u64) -> Result<Value, ProtocolError> {
    let mut data = String::new();
    let mut events = Vec::new();
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        } else if line.is_empty() && !data.is_empty() {
            events.push(std::mem::take(&mut data));
        }
    }
    if !data.is_empty() {
        events.push(data);
    }

    events
        .iter()
        .filter_map(|e| serde_json::from_str::<Value>(e).ok())
        .find(|v| v.get("id").and_then(Value::as_u64) == Some(id))
        .ok_or_else(|| ProtocolError::Decode(format!("no response with id {id} in event stream")))
}

/// Normalize a `tools/call` result.
///
/// A single text item is parsed as JSON when it is JSON and wrapped as
/// `{"text": ...}` otherwise. Any other content is returned as `{"content": [...]}`.
pub fn parse_tool_result(result: Value) -> Result<Value, ProtocolError> {
    let content = result.get("content").and_then(Value::as_array);

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        let message = content
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "tool reported an error".to_string());
        return Err(ProtocolError::Tool(message));
    }

    match content {
        Some(items) if items.len() == 1 && items[0].get("type").and_then(Value::as_str) == Some("text") => {
            let text = items[0].get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(serde_json::from_str(text).unwrap_or_else(|_| json!({ "text": text })))
        }
        Some(items) => Ok(json!({ "content": items })),
        None => Ok(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_text_json_is_parsed() {
        let v = parse_tool_result(json!({
            "content": [{ "type": "text", "text": "{\"temp\": 21}" }]
        }))
        .unwrap();
        assert_eq!(v, json!({ "temp": 21 }));
    }

    #[test]
    fn test_single_plain_text_is_wrapped() {
        let v = parse_tool_result(json!({
            "content": [{ "type": "text", "text": "sunny" }]
        }))
        .unwrap();
        assert_eq!(v, json!({ "text": "sunny" }));
    }

    #[test]
    fn test_multiple_items_kept_as_content() {
        let v = parse_tool_result(json!({
            "content": [
                { "type": "text", "text": "a" },
                { "type": "image", "data": "..." }
            ]
        }))
        .unwrap();
        assert_eq!(v["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_is_error_becomes_tool_error() {
        let err = parse_tool_result(json!({
            "isError": true,
            "content": [{ "type": "text", "text": "city not found" }]
        }))
        .unwrap_err();
        assert_eq!(err, ProtocolError::Tool("city not found".into()));
        assert!(!err.invalidates_connection());
    }

    #[test]
    fn test_stream_response_matched_by_id() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n\
                    event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":4,\"result\":{\"ok\":true}}\n\n";
        let v = find_stream_response(body, 4).unwrap();
        assert_eq!(unwrap_envelope(v).unwrap(), json!({ "ok": true }));
        assert!(find_stream_response(body, 5).is_err());
    }

    #[test]
    fn test_rpc_error_envelope() {
        let err = unwrap_envelope(json!({
            "jsonrpc": "2.0", "id": 1, "error": { "code": -32601, "message": "nope" }
        }))
        .unwrap_err();
        assert_eq!(err, ProtocolError::Rpc { code: -32601, message: "nope".into() });
    }
}
