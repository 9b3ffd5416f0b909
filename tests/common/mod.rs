//! Shared utilities for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;
use uuid::Uuid;

use mcp_router::config::schema::{InstanceConfig, ServiceConfig};
use mcp_router::protocol::{BackendClient, ClientHandle, ProtocolError};
use mcp_router::registry::BackendInstance;
use mcp_router::{Gateway, RouterConfig};

/// Backend client whose behaviour is scripted per port.
#[derive(Default)]
pub struct MockBackendClient {
    pub inits: AtomicU64,
    pub closes: AtomicU64,
    init_delay_ms: AtomicU64,
    invoke_delay_ms: AtomicU64,
    down: Mutex<HashSet<u16>>,
    tool_errors: Mutex<HashSet<u16>>,
    capabilities: Mutex<HashMap<u16, Vec<String>>>,
    invokes: Mutex<HashMap<u16, u64>>,
}

impl MockBackendClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every operation against `port` fails with a transport error.
    pub fn take_down(&self, port: u16) {
        self.down.lock().unwrap().insert(port);
    }

    pub fn bring_up(&self, port: u16) {
        self.down.lock().unwrap().remove(&port);
    }

    /// Invocations on `port` report a tool-level failure.
    pub fn fail_tools(&self, port: u16) {
        self.tool_errors.lock().unwrap().insert(port);
    }

    pub fn set_capabilities(&self, port: u16, names: &[&str]) {
        self.capabilities
            .lock()
            .unwrap()
            .insert(port, names.iter().map(|n| n.to_string()).collect());
    }

    pub fn set_init_delay(&self, delay: Duration) {
        self.init_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_invoke_delay(&self, delay: Duration) {
        self.invoke_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn invokes_on(&self, port: u16) -> u64 {
        self.invokes.lock().unwrap().get(&port).copied().unwrap_or(0)
    }

    pub fn init_count(&self) -> u64 {
        self.inits.load(Ordering::SeqCst)
    }

    fn port_of(handle: &ClientHandle) -> u16 {
        handle.endpoint.port().unwrap_or_default()
    }

    fn check_up(&self, port: u16) -> Result<(), ProtocolError> {
        if self.down.lock().unwrap().contains(&port) {
            Err(ProtocolError::Transport(format!("connection refused on port {port}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BackendClient for MockBackendClient {
    async fn initialize(
        &self,
        instance: &BackendInstance,
        _timeout: Duration,
    ) -> Result<ClientHandle, ProtocolError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        let delay = self.init_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_up(instance.port)?;
        Ok(ClientHandle {
            id: Uuid::new_v4(),
            backend: instance.key(),
            endpoint: Url::parse(&format!("http://{}:{}/mcp", instance.host, instance.port)).unwrap(),
            session_id: None,
            server_info: json!({ "name": "mock" }),
        })
    }

    async fn invoke(
        &self,
        handle: &ClientHandle,
        capability: &str,
        arguments: Value,
        _timeout: Duration,
    ) -> Result<Value, ProtocolError> {
        let port = Self::port_of(handle);
        *self.invokes.lock().unwrap().entry(port).or_default() += 1;
        let delay = self.invoke_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_up(port)?;
        if self.tool_errors.lock().unwrap().contains(&port) {
            return Err(ProtocolError::Tool(format!("{capability} failed")));
        }
        Ok(json!({ "port": port, "capability": capability, "arguments": arguments }))
    }

    async fn list_capabilities(
        &self,
        handle: &ClientHandle,
        _timeout: Duration,
    ) -> Result<Vec<String>, ProtocolError> {
        let port = Self::port_of(handle);
        self.check_up(port)?;
        Ok(self
            .capabilities
            .lock()
            .unwrap()
            .get(&port)
            .cloned()
            .unwrap_or_else(|| vec!["echo".to_string()]))
    }

    async fn ping(&self, handle: &ClientHandle, _timeout: Duration) -> Result<(), ProtocolError> {
        self.check_up(Self::port_of(handle))
    }

    async fn close(&self, _handle: &ClientHandle) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A config with one service and one instance per port, background loops off.
pub fn config_with(service: &str, ports: &[u16]) -> RouterConfig {
    let mut config = RouterConfig::default();
    config.health.enabled = false;
    config.observability.metrics_enabled = false;
    add_service(&mut config, service, ports);
    config
}

pub fn add_service(config: &mut RouterConfig, service: &str, ports: &[u16]) {
    config.registry.services.push(ServiceConfig {
        name: service.to_string(),
        group: "mcp-server".to_string(),
        instances: ports
            .iter()
            .map(|&port| InstanceConfig {
                host: "127.0.0.1".to_string(),
                port,
                weight: 1.0,
                enabled: true,
                healthy: true,
                metadata: HashMap::new(),
            })
            .collect(),
    });
}

pub fn gateway(config: RouterConfig, client: Arc<MockBackendClient>) -> Gateway {
    Gateway::with_client(config, client)
}

pub fn instance(service: &str, port: u16) -> BackendInstance {
    BackendInstance::new(service, "127.0.0.1", port)
}

/// Serve the gateway's control surface on an ephemeral port.
pub async fn serve(gateway: &Gateway) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = gateway.http_server();
    let shutdown = gateway.shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, shutdown).await;
    });
    addr
}

#[derive(Clone, Default)]
struct McpState {
    calls: Arc<AtomicU64>,
}

/// Minimal MCP tool server speaking JSON-RPC over HTTP POST at `/mcp`.
///
/// Tools: `echo` returns its arguments, `fail` reports a tool error.
pub async fn start_mcp_server() -> (SocketAddr, Arc<AtomicU64>) {
    let state = McpState::default();
    let calls = state.calls.clone();
    let app = Router::new()
        .route("/mcp", post(mcp_handler).delete(|| async { StatusCode::OK }))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, calls)
}

async fn mcp_handler(
    State(state): State<McpState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let method = body.get("method").and_then(Value::as_str).unwrap_or_default();
    let has_session = headers.contains_key("mcp-session-id");

    let result = match method {
        "initialize" => {
            let reply = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "mock-mcp", "version": "0.1.0" }
                }
            });
            return ([("mcp-session-id", "mock-session-1")], Json(reply)).into_response();
        }
        "notifications/initialized" => return StatusCode::ACCEPTED.into_response(),
        _ if !has_session => {
            return (StatusCode::BAD_REQUEST, "missing session").into_response();
        }
        "ping" => json!({}),
        "tools/list" => json!({ "tools": [ { "name": "echo" }, { "name": "fail" } ] }),
        "tools/call" => {
            state.calls.fetch_add(1, Ordering::SeqCst);
            let params = body.get("params").cloned().unwrap_or_default();
            match params.get("name").and_then(Value::as_str) {
                Some("echo") => {
                    let args = params.get("arguments").cloned().unwrap_or_default();
                    json!({ "content": [ { "type": "text", "text": args.to_string() } ] })
                }
                _ => json!({
                    "isError": true,
                    "content": [ { "type": "text", "text": "tool exploded" } ]
                }),
            }
        }
        other => {
            let reply = json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("unknown method {other}") }
            });
            return Json(reply).into_response();
        }
    };
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response()
}
