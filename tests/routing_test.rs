//! Routing engine integration tests against a scripted backend client.

use serde_json::json;
use std::time::Duration;

use mcp_router::error::{
    CODE_CAPABILITY_NOT_FOUND, CODE_CONNECTION, CODE_INVALID_PARAMS, CODE_INVOCATION,
    CODE_METHOD_NOT_FOUND, CODE_SERVICE_UNAVAILABLE, CODE_TIMEOUT,
};
use mcp_router::load_balancer::Strategy;
use mcp_router::protocol::RouterMessage;
use mcp_router::resilience::CircuitState;
use mcp_router::routing::RouteTarget;

mod common;
use common::{add_service, config_with, gateway, instance, MockBackendClient};

#[tokio::test]
async fn test_route_returns_result_and_metadata() {
    let client = MockBackendClient::new();
    let gw = gateway(config_with("weather", &[9001]), client.clone());

    let msg = RouterMessage::invoke("echo", json!({ "city": "Oslo" }));
    let resp = gw.engine.route("weather", &msg, None).await;

    assert!(resp.is_success(), "unexpected error: {:?}", resp.error);
    let result = resp.result.unwrap();
    assert_eq!(result["capability"], "echo");
    assert_eq!(result["arguments"]["city"], "Oslo");
    assert_eq!(resp.metadata.target_service.as_deref(), Some("weather"));
    assert_eq!(resp.metadata.backend.as_deref(), Some("weather:127.0.0.1:9001"));
    assert_eq!(resp.metadata.strategy.as_deref(), Some("weighted_round_robin"));
    assert!(!resp.metadata.request_id.is_empty());
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let gw = gateway(config_with("weather", &[9001]), MockBackendClient::new());
    let mut msg = RouterMessage::invoke("echo", json!({}));
    msg.id = Some(json!("req-42"));

    let resp = gw.engine.route("weather", &msg, None).await;
    assert_eq!(resp.id, Some(json!("req-42")));
}

#[tokio::test]
async fn test_unknown_service_is_unavailable() {
    let gw = gateway(config_with("weather", &[9001]), MockBackendClient::new());
    let resp = gw
        .engine
        .route("nope", &RouterMessage::invoke("echo", json!({})), None)
        .await;
    assert_eq!(resp.error_code(), Some(CODE_SERVICE_UNAVAILABLE));
}

#[tokio::test]
async fn test_malformed_requests_never_reach_a_backend() {
    let client = MockBackendClient::new();
    let gw = gateway(config_with("weather", &[9001]), client.clone());

    let mut wrong_method = RouterMessage::invoke("echo", json!({}));
    wrong_method.method = "resources/list".into();
    let resp = gw.engine.route("weather", &wrong_method, None).await;
    assert_eq!(resp.error_code(), Some(CODE_METHOD_NOT_FOUND));

    let mut no_name = RouterMessage::invoke("echo", json!({}));
    no_name.params = Some(json!({ "arguments": {} }));
    let resp = gw.engine.route("weather", &no_name, None).await;
    assert_eq!(resp.error_code(), Some(CODE_INVALID_PARAMS));

    assert_eq!(client.init_count(), 0);
}

#[tokio::test]
async fn test_round_robin_spreads_calls() {
    let client = MockBackendClient::new();
    let mut config = config_with("weather", &[9001, 9002]);
    config.load_balancer.strategy = Strategy::RoundRobin;
    let gw = gateway(config, client.clone());

    let msg = RouterMessage::invoke("echo", json!({}));
    for _ in 0..6 {
        assert!(gw.engine.route("weather", &msg, None).await.is_success());
    }
    assert_eq!(client.invokes_on(9001), 3);
    assert_eq!(client.invokes_on(9002), 3);
    // One initialize per backend; the rest are cache hits.
    assert_eq!(client.init_count(), 2);
}

#[tokio::test]
async fn test_smart_route_finds_provider_and_skips_self() {
    let client = MockBackendClient::new();
    let mut config = config_with("search-svc", &[9101]);
    add_service(&mut config, "weather", &[9201]);
    add_service(&mut config, "mcp-router", &[9301]);
    client.set_capabilities(9101, &["search"]);
    client.set_capabilities(9201, &["forecast"]);
    client.set_capabilities(9301, &["search"]);
    let gw = gateway(config, client.clone());

    let msg = RouterMessage::invoke("search", json!({ "q": "rust" }));
    for _ in 0..5 {
        let resp = gw.engine.smart_route(&msg, None).await;
        assert!(resp.is_success(), "unexpected error: {:?}", resp.error);
        assert_eq!(resp.metadata.target_service.as_deref(), Some("search-svc"));
    }
    assert_eq!(client.invokes_on(9301), 0);
}

#[tokio::test]
async fn test_smart_route_without_provider() {
    let client = MockBackendClient::new();
    let gw = gateway(config_with("weather", &[9001]), client.clone());

    let resp = gw
        .engine
        .dispatch(&RouteTarget::Smart, &RouterMessage::invoke("translate", json!({})), None)
        .await;
    assert_eq!(resp.error_code(), Some(CODE_CAPABILITY_NOT_FOUND));
    assert_eq!(client.invokes_on(9001), 0);
}

#[tokio::test]
async fn test_capability_discovery_spans_services_and_skips_self() {
    let client = MockBackendClient::new();
    let mut config = config_with("search-a", &[9101]);
    add_service(&mut config, "search-b", &[9201]);
    add_service(&mut config, "weather", &[9301]);
    add_service(&mut config, "mcp-router", &[9401]);
    client.set_capabilities(9101, &["search", "index"]);
    client.set_capabilities(9201, &["search"]);
    client.set_capabilities(9301, &["forecast"]);
    client.set_capabilities(9401, &["admin"]);
    client.take_down(9201);
    let gw = gateway(config, client.clone());

    assert_eq!(gw.engine.capabilities("search-a").await.unwrap(), vec!["index", "search"]);
    assert!(gw.engine.has_capability("weather", "forecast").await);
    assert!(!gw.engine.has_capability("weather", "search").await);
    assert!(!gw.engine.has_capability("ghost", "search").await);
    let err = gw.engine.capabilities("ghost").await.unwrap_err();
    assert_eq!(err.code(), CODE_SERVICE_UNAVAILABLE);

    // search-b is unreachable, so only search-a answers.
    assert_eq!(gw.engine.providers_for("search").await.unwrap(), vec!["search-a"]);
    assert!(gw.engine.providers_for("admin").await.unwrap().is_empty());

    client.bring_up(9201);
    let catalog = gw.engine.available_capabilities().await.unwrap();
    let names: Vec<&str> = catalog.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["forecast", "index", "search"]);
    assert_eq!(catalog["search"], vec!["search-a", "search-b"]);
    assert_eq!(client.invokes_on(9101), 0);
}

#[tokio::test]
async fn test_tool_error_is_not_a_health_failure() {
    let client = MockBackendClient::new();
    client.fail_tools(9001);
    let gw = gateway(config_with("weather", &[9001]), client.clone());

    let resp = gw
        .engine
        .route("weather", &RouterMessage::invoke("echo", json!({})), None)
        .await;
    assert_eq!(resp.error_code(), Some(CODE_INVOCATION));

    let snap = gw.health.snapshot("weather:127.0.0.1:9001").unwrap();
    assert_eq!(snap.consecutive_failures, 0);
    assert_eq!(snap.success_count, 1);
    assert!(gw.connections.is_connected("weather:127.0.0.1:9001"));
}

#[tokio::test]
async fn test_repeated_connection_failures_open_the_circuit() {
    let client = MockBackendClient::new();
    client.take_down(9001);
    let gw = gateway(config_with("weather", &[9001]), client.clone());
    let msg = RouterMessage::invoke("echo", json!({}));

    for _ in 0..3 {
        let resp = gw.engine.route("weather", &msg, None).await;
        assert_eq!(resp.error_code(), Some(CODE_CONNECTION));
    }
    assert_eq!(gw.health.circuit_state(&instance("weather", 9001)), CircuitState::Open);

    let inits_before = client.init_count();
    let resp = gw.engine.route("weather", &msg, None).await;
    assert_eq!(resp.error_code(), Some(CODE_SERVICE_UNAVAILABLE));
    assert_eq!(client.init_count(), inits_before);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let client = MockBackendClient::new();
    client.set_invoke_delay(Duration::from_millis(500));
    let gw = gateway(config_with("weather", &[9001]), client.clone());

    let resp = gw
        .engine
        .route(
            "weather",
            &RouterMessage::invoke("echo", json!({})),
            Some(Duration::from_millis(100)),
        )
        .await;
    assert_eq!(resp.error_code(), Some(CODE_TIMEOUT));
    assert!(resp.metadata.elapsed_ms < 500);
}

#[tokio::test]
async fn test_timeout_after_slow_connect_drops_connection() {
    let client = MockBackendClient::new();
    client.set_init_delay(Duration::from_millis(40));
    client.set_invoke_delay(Duration::from_millis(500));
    let gw = gateway(config_with("weather", &[9001]), client.clone());

    let resp = gw
        .engine
        .route(
            "weather",
            &RouterMessage::invoke("echo", json!({})),
            Some(Duration::from_millis(100)),
        )
        .await;
    assert_eq!(resp.error_code(), Some(CODE_TIMEOUT));
    assert!(resp.metadata.elapsed_ms < 500);
    assert!(!gw.connections.is_connected("weather:127.0.0.1:9001"));
}

#[tokio::test]
async fn test_forced_open_circuit_blocks_service() {
    let client = MockBackendClient::new();
    let gw = gateway(config_with("weather", &[9001]), client.clone());
    let msg = RouterMessage::invoke("echo", json!({}));

    gw.health.open_circuit("weather");
    let resp = gw.engine.route("weather", &msg, None).await;
    assert_eq!(resp.error_code(), Some(CODE_SERVICE_UNAVAILABLE));

    gw.health.reset_circuit("weather");
    assert!(gw.engine.route("weather", &msg, None).await.is_success());
}

#[tokio::test]
async fn test_apply_config_swaps_strategy() {
    let gw = gateway(config_with("weather", &[9001]), MockBackendClient::new());
    assert_eq!(gw.engine.settings().strategy, Strategy::WeightedRoundRobin);

    let mut next = gw.config.clone();
    next.load_balancer.strategy = Strategy::LeastConnections;
    next.routing.default_timeout_ms = 5_000;
    gw.engine.apply_config(&next);

    let settings = gw.engine.settings();
    assert_eq!(settings.strategy, Strategy::LeastConnections);
    assert_eq!(settings.default_timeout, Duration::from_secs(5));
}
