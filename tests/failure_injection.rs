//! Failure injection tests for the router.

use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use mcp_router::error::{CODE_CONNECTION, CODE_SERVICE_UNAVAILABLE};
use mcp_router::load_balancer::Strategy;
use mcp_router::protocol::RouterMessage;
use mcp_router::registry::{RegistryWatcher, ServiceRegistry};
use mcp_router::RouterError;

mod common;
use common::{add_service, config_with, gateway, instance, MockBackendClient};

#[tokio::test]
async fn test_broadcast_reports_each_instance() {
    let client = MockBackendClient::new();
    let gw = gateway(config_with("indexer", &[9001, 9002, 9003]), client.clone());
    client.take_down(9002);

    let report = gw
        .engine
        .broadcast("indexer", &RouterMessage::invoke("reindex", json!({ "full": true })))
        .await
        .unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    let failed = report.outcomes.iter().find(|o| !o.success).unwrap();
    assert_eq!(failed.backend, "indexer:127.0.0.1:9002");
    assert_eq!(failed.error.as_ref().unwrap().code, CODE_CONNECTION);
    assert!(report
        .outcomes
        .iter()
        .filter(|o| o.success)
        .all(|o| o.result.as_ref().unwrap()["capability"] == "reindex"));
}

#[tokio::test]
async fn test_broadcast_without_instances_fails_fast() {
    let client = MockBackendClient::new();
    let gw = gateway(config_with("indexer", &[9001]), client.clone());

    let started = Instant::now();
    let err = gw
        .engine
        .broadcast("ghost", &RouterMessage::invoke("reindex", json!({})))
        .await
        .unwrap_err();

    assert_eq!(err, RouterError::ServiceUnavailable("ghost".into()));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(client.init_count(), 0);
}

#[tokio::test]
async fn test_broadcast_respects_per_instance_timeout() {
    let client = MockBackendClient::new();
    client.set_invoke_delay(Duration::from_millis(400));
    let mut config = config_with("indexer", &[9001, 9002]);
    config.routing.broadcast_timeout_ms = 100;
    let gw = gateway(config, client.clone());

    let started = Instant::now();
    let report = gw
        .engine
        .broadcast("indexer", &RouterMessage::invoke("reindex", json!({})))
        .await
        .unwrap();

    assert_eq!(report.failed, 2);
    // Fan-out is concurrent: both time out within one budget, not two.
    assert!(started.elapsed() < Duration::from_millis(350));
}

#[tokio::test]
async fn test_failover_to_remaining_instance() {
    let client = MockBackendClient::new();
    let mut config = config_with("weather", &[9001, 9002]);
    config.load_balancer.strategy = Strategy::RoundRobin;
    let gw = gateway(config, client.clone());
    client.take_down(9001);

    let msg = RouterMessage::invoke("echo", json!({}));
    let mut failures = 0;
    for _ in 0..12 {
        if !gw.engine.route("weather", &msg, None).await.is_success() {
            failures += 1;
        }
    }

    // Only the calls made before the circuit opened can fail.
    assert_eq!(failures, 3);
    assert!(client.invokes_on(9002) >= 9);
}

#[tokio::test]
async fn test_transport_failure_evicts_cached_connection() {
    let client = MockBackendClient::new();
    let gw = gateway(config_with("weather", &[9001]), client.clone());
    let key = "weather:127.0.0.1:9001";
    let msg = RouterMessage::invoke("echo", json!({}));

    assert!(gw.engine.route("weather", &msg, None).await.is_success());
    assert!(gw.connections.is_connected(key));

    client.take_down(9001);
    let resp = gw.engine.route("weather", &msg, None).await;
    assert_eq!(resp.error_code(), Some(CODE_CONNECTION));
    assert!(!gw.connections.is_connected(key));

    client.bring_up(9001);
    assert!(gw.engine.route("weather", &msg, None).await.is_success());
    assert_eq!(client.init_count(), 2);
}

#[tokio::test]
async fn test_smart_route_skips_unreachable_provider() {
    let client = MockBackendClient::new();
    let mut config = config_with("search-a", &[9101]);
    add_service(&mut config, "search-b", &[9201]);
    client.set_capabilities(9101, &["search"]);
    client.set_capabilities(9201, &["search"]);
    client.take_down(9101);
    let gw = gateway(config, client.clone());

    let resp = gw
        .engine
        .smart_route(&RouterMessage::invoke("search", json!({})), None)
        .await;
    assert!(resp.is_success(), "unexpected error: {:?}", resp.error);
    assert_eq!(resp.metadata.target_service.as_deref(), Some("search-b"));
}

#[tokio::test]
async fn test_deregistered_instance_loses_connection_and_stats() {
    let client = MockBackendClient::new();
    let gw = gateway(config_with("weather", &[9001, 9002]), client.clone());
    for port in [9001, 9002] {
        gw.connections
            .get_or_create(&instance("weather", port), Duration::from_secs(1))
            .await
            .unwrap();
        gw.balancer
            .record_success(&instance("weather", port).key(), Duration::from_millis(5));
    }

    let watcher = RegistryWatcher::new(
        gw.registry.clone(),
        gw.connections.clone(),
        gw.balancer.clone(),
        vec!["mcp-server".into()],
        Duration::from_secs(60),
    );
    tokio::spawn(watcher.run(gw.shutdown.subscribe()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(gw.registry.deregister("weather", "mcp-server", "127.0.0.1", 9002));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(gw.connections.is_connected("weather:127.0.0.1:9001"));
    assert!(!gw.connections.is_connected("weather:127.0.0.1:9002"));
    assert_eq!(client.closes.load(Ordering::SeqCst), 1);
    let tracked: Vec<String> = gw.balancer.stats().into_iter().map(|s| s.backend).collect();
    assert_eq!(tracked, vec!["weather:127.0.0.1:9001".to_string()]);
    gw.shutdown.trigger();
}

#[tokio::test]
async fn test_disabled_instance_is_never_selected() {
    let client = MockBackendClient::new();
    let gw = gateway(config_with("weather", &[9001, 9002]), client.clone());
    let mut disabled = gw
        .registry
        .list_instances("weather", "mcp-server")
        .await
        .unwrap()
        .into_iter()
        .find(|i| i.port == 9002)
        .unwrap();
    disabled.enabled = false;
    gw.registry.register(disabled);

    let msg = RouterMessage::invoke("echo", json!({}));
    for _ in 0..5 {
        assert!(gw.engine.route("weather", &msg, None).await.is_success());
    }
    assert_eq!(client.invokes_on(9002), 0);

    gw.registry.deregister("weather", "mcp-server", "127.0.0.1", 9001);
    let resp = gw.engine.route("weather", &msg, None).await;
    assert_eq!(resp.error_code(), Some(CODE_SERVICE_UNAVAILABLE));
}
