//! Singleflight connection manager.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::schema::ConnectionConfig;
use crate::error::{RouterError, RouterResult};
use crate::observability::metrics;
use crate::protocol::{BackendClient, ClientHandle, ProtocolError};
use crate::registry::BackendInstance;

type CreationFuture = Shared<BoxFuture<'static, RouterResult<Arc<CachedConnection>>>>;

/// An initialized client handle owned by the cache.
#[derive(Debug)]
pub struct CachedConnection {
    pub key: String,
    pub service: String,
    pub handle: ClientHandle,
    created_at: Instant,
    last_used: Mutex<Instant>,
    requests: AtomicU64,
}

impl CachedConnection {
    fn new(instance: &BackendInstance, handle: ClientHandle) -> Self {
        let now = Instant::now();
        Self {
            key: instance.key(),
            service: instance.service.clone(),
            handle,
            created_at: now,
            last_used: Mutex::new(now),
            requests: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_used.lock() {
            *last = Instant::now();
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle(&self) -> Duration {
        self.last_used
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

enum Slot {
    Ready(Arc<CachedConnection>),
    Pending {
        generation: u64,
        service: String,
        creation: CreationFuture,
    },
}

impl Slot {
    fn is_pending(&self, gen: u64) -> bool {
        matches!(self, Slot::Pending { generation, .. } if *generation == gen)
    }

    fn is_ready(&self, conn: &Arc<CachedConnection>) -> bool {
        matches!(self, Slot::Ready(c) if Arc::ptr_eq(c, conn))
    }

    fn service(&self) -> &str {
        match self {
            Slot::Ready(c) => &c.service,
            Slot::Pending { service, .. } => service,
        }
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    closed: AtomicU64,
    failed: AtomicU64,
    requests: AtomicU64,
    cache_hits: AtomicU64,
}

/// Snapshot of the connection cache.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub live: usize,
    pub pending: usize,
    pub created: u64,
    pub closed: u64,
    pub failed: u64,
    pub requests: u64,
    pub cache_hits: u64,
    pub hit_rate: f64,
}

/// Owns every live backend connection.
pub struct ConnectionManager {
    client: Arc<dyn BackendClient>,
    slots: Arc<DashMap<String, Slot>>,
    config: ConnectionConfig,
    generation: AtomicU64,
    counters: Arc<PoolCounters>,
}

impl ConnectionManager {
    pub fn new(client: Arc<dyn BackendClient>, config: ConnectionConfig) -> Self {
        Self {
            client,
            slots: Arc::new(DashMap::new()),
            config,
            generation: AtomicU64::new(1),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Return the cached connection for `instance`, creating it at most once.
    ///
    /// `timeout` bounds how long this caller waits. Creation itself is bounded
    /// by the configured connect timeout and keeps running if the caller gives up.
    pub async fn get_or_create(
        &self,
        instance: &BackendInstance,
        timeout: Duration,
    ) -> RouterResult<Arc<CachedConnection>> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let key = instance.key();

        let creation = match self.slots.entry(key.clone()) {
            Entry::Occupied(slot) => match slot.get() {
                Slot::Ready(conn) => {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(conn.clone());
                }
                Slot::Pending { creation, .. } => creation.clone(),
            },
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let creation = self.spawn_creation(instance.clone(), generation);
                slot.insert(Slot::Pending {
                    generation,
                    service: instance.service.clone(),
                    creation: creation.clone(),
                });
                creation
            }
        };

        match time::timeout(timeout, creation).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::timeout("connect", timeout)),
        }
    }

    fn spawn_creation(&self, instance: BackendInstance, generation: u64) -> CreationFuture {
        let client = self.client.clone();
        let slots = self.slots.clone();
        let counters = self.counters.clone();
        let connect_timeout = self.config.connect_timeout();
        let key = instance.key();

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = time::timeout(connect_timeout, client.initialize(&instance, connect_timeout)).await;
            let result = match outcome {
                Ok(Ok(handle)) => Ok(Arc::new(CachedConnection::new(&instance, handle))),
                Ok(Err(ProtocolError::Timeout(after))) => Err(RouterError::timeout("initialize", after)),
                Ok(Err(e)) => Err(RouterError::Connection {
                    backend: key.clone(),
                    cause: e.to_string(),
                }),
                Err(_) => Err(RouterError::timeout("initialize", connect_timeout)),
            };

            match result {
                Ok(conn) => {
                    let installed = match slots.get_mut(&key) {
                        Some(mut slot) if slot.is_pending(generation) => {
                            *slot = Slot::Ready(conn.clone());
                            true
                        }
                        _ => false,
                    };
                    if installed {
                        counters.created.fetch_add(1, Ordering::Relaxed);
                        metrics::record_connection_created(&instance.service);
                        tracing::info!(
                            backend = %key,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Backend connection established"
                        );
                        Ok(conn)
                    } else {
                        client.close(&conn.handle).await;
                        counters.closed.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(backend = %key, "Connection closed while it was being created");
                        Err(RouterError::Connection {
                            backend: key,
                            cause: "connection closed during creation".into(),
                        })
                    }
                }
                Err(err) => {
                    slots.remove_if(&key, |_, slot| slot.is_pending(generation));
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(backend = %key, error = %err, "Backend connection failed");
                    Err(err)
                }
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(RouterError::Connection {
                    backend: "unknown".into(),
                    cause: format!("connection task failed: {e}"),
                }),
            }
        }
        .boxed()
        .shared()
    }

    /// Invoke `capability` on `instance` through its cached connection.
    ///
    /// The call gets whatever is left before `deadline` once the connection
    /// is ready, so a timed-out call always passes through eviction.
    pub async fn invoke(
        &self,
        instance: &BackendInstance,
        capability: &str,
        arguments: Value,
        connect_timeout: Duration,
        deadline: Instant,
    ) -> RouterResult<Value> {
        let conn = self.get_or_create(instance, connect_timeout).await?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RouterError::timeout("invoke", connect_timeout));
        }
        conn.touch();
        let call = self.client.invoke(&conn.handle, capability, arguments, remaining);
        let outcome = match time::timeout(remaining, call).await {
            Ok(r) => r,
            Err(_) => Err(ProtocolError::Timeout(remaining)),
        };
        self.finish(&conn, outcome, Some(capability), "invoke")
    }

    /// Names of the capabilities `instance` offers.
    pub async fn list_capabilities(
        &self,
        instance: &BackendInstance,
        timeout: Duration,
    ) -> RouterResult<Vec<String>> {
        let deadline = Instant::now() + timeout;
        let conn = self.get_or_create(instance, timeout).await?;
        conn.touch();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = match time::timeout(remaining, self.client.list_capabilities(&conn.handle, remaining)).await {
            Ok(r) => r,
            Err(_) => Err(ProtocolError::Timeout(remaining)),
        };
        self.finish(&conn, outcome, None, "list_capabilities")
    }

    /// Protocol-level liveness probe.
    pub async fn ping(&self, instance: &BackendInstance, timeout: Duration) -> RouterResult<()> {
        let deadline = Instant::now() + timeout;
        let conn = self.get_or_create(instance, timeout).await?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = match time::timeout(remaining, self.client.ping(&conn.handle, remaining)).await {
            Ok(r) => r,
            Err(_) => Err(ProtocolError::Timeout(remaining)),
        };
        self.finish(&conn, outcome, None, "ping")
    }

    /// Classify a protocol failure and detach the connection if it is broken.
    fn finish<T>(
        &self,
        conn: &Arc<CachedConnection>,
        outcome: Result<T, ProtocolError>,
        capability: Option<&str>,
        stage: &'static str,
    ) -> RouterResult<T> {
        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let evicted = if err.invalidates_connection() {
            self.slots
                .remove_if(&conn.key, |_, slot| slot.is_ready(conn))
                .and_then(|(_, slot)| match slot {
                    Slot::Ready(c) => Some(c),
                    Slot::Pending { .. } => None,
                })
        } else {
            None
        };
        if let Some(evicted) = evicted {
            tracing::warn!(backend = %conn.key, stage, error = %err, "Connection invalidated");
            self.spawn_close(evicted);
        }

        let router_err = match err {
            ProtocolError::Timeout(after) => RouterError::timeout(stage, after),
            ProtocolError::Transport(cause) | ProtocolError::Decode(cause) => RouterError::Connection {
                backend: conn.key.clone(),
                cause,
            },
            ProtocolError::Rpc { .. } | ProtocolError::Tool(_) => RouterError::Invocation {
                backend: conn.key.clone(),
                capability: capability.unwrap_or(stage).to_string(),
                cause: err.to_string(),
            },
        };
        Err(router_err)
    }

    fn spawn_close(&self, conn: Arc<CachedConnection>) {
        let client = self.client.clone();
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            client.close(&conn.handle).await;
        });
    }

    async fn release(&self, slot: Slot) {
        if let Slot::Ready(conn) = slot {
            self.client.close(&conn.handle).await;
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(backend = %conn.key, "Connection closed");
        }
    }

    /// Evict and close one connection. Closing an unknown key is a no-op.
    pub async fn close(&self, key: &str) {
        if let Some((_, slot)) = self.slots.remove(key) {
            self.release(slot).await;
        }
    }

    /// Close every connection belonging to `service`. Returns how many slots were evicted.
    pub async fn close_service(&self, service: &str) -> usize {
        let keys: Vec<String> = self
            .slots
            .iter()
            .filter(|e| e.value().service() == service)
            .map(|e| e.key().clone())
            .collect();
        let mut evicted = 0;
        for key in keys {
            if let Some((_, slot)) = self.slots.remove(&key) {
                self.release(slot).await;
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::info!(service, evicted, "Closed service connections");
        }
        evicted
    }

    /// Close everything. Used at shutdown.
    pub async fn close_all(&self) -> usize {
        let keys: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut evicted = 0;
        for key in keys {
            if let Some((_, slot)) = self.slots.remove(&key) {
                self.release(slot).await;
                evicted += 1;
            }
        }
        tracing::info!(evicted, "All backend connections closed");
        evicted
    }

    /// Close connections past their idle or lifetime limit.
    pub async fn reap_expired(&self) -> usize {
        let idle_limit = self.config.idle_timeout();
        let lifetime = self.config.max_lifetime();
        let expired: Vec<Arc<CachedConnection>> = self
            .slots
            .iter()
            .filter_map(|e| match e.value() {
                Slot::Ready(c) if c.idle() > idle_limit || c.age() > lifetime => Some(c.clone()),
                _ => None,
            })
            .collect();

        let mut reaped = 0;
        for conn in expired {
            if let Some((_, slot)) = self.slots.remove_if(&conn.key, |_, slot| slot.is_ready(&conn)) {
                tracing::debug!(backend = %conn.key, idle_secs = conn.idle().as_secs(), "Reaping connection");
                self.release(slot).await;
                reaped += 1;
            }
        }
        reaped
    }

    /// Periodic reaper loop.
    pub async fn run_reaper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.reap_interval_secs);
        let mut ticker = time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = self.reap_expired().await;
                    if reaped > 0 {
                        tracing::info!(reaped, "Expired backend connections reaped");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Connection reaper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub fn is_connected(&self, key: &str) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| matches!(slot.value(), Slot::Ready(_)))
    }

    pub fn stats(&self) -> PoolStats {
        let (mut live, mut pending) = (0, 0);
        for entry in self.slots.iter() {
            match entry.value() {
                Slot::Ready(_) => live += 1,
                Slot::Pending { .. } => pending += 1,
            }
        }
        let requests = self.counters.requests.load(Ordering::Relaxed);
        let cache_hits = self.counters.cache_hits.load(Ordering::Relaxed);
        PoolStats {
            live,
            pending,
            created: self.counters.created.load(Ordering::Relaxed),
            closed: self.counters.closed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            requests,
            cache_hits,
            hit_rate: if requests == 0 { 0.0 } else { cache_hits as f64 / requests as f64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use url::Url;
    use uuid::Uuid;

    #[derive(Default)]
    struct ScriptedClient {
        inits: AtomicU64,
        closes: AtomicU64,
        fail_init: AtomicBool,
        init_delay_ms: AtomicU64,
        invoke_delay_ms: AtomicU64,
        invoke_error: Mutex<Option<ProtocolError>>,
    }

    #[async_trait]
    impl BackendClient for ScriptedClient {
        async fn initialize(
            &self,
            instance: &BackendInstance,
            _timeout: Duration,
        ) -> Result<ClientHandle, ProtocolError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            let delay = self.init_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(ProtocolError::Transport("connection refused".into()));
            }
            Ok(ClientHandle {
                id: Uuid::new_v4(),
                backend: instance.key(),
                endpoint: Url::parse("http://127.0.0.1:1/mcp").unwrap(),
                session_id: None,
                server_info: json!({}),
            })
        }

        async fn invoke(
            &self,
            _handle: &ClientHandle,
            capability: &str,
            _arguments: Value,
            _timeout: Duration,
        ) -> Result<Value, ProtocolError> {
            let delay = self.invoke_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                time::sleep(Duration::from_millis(delay)).await;
            }
            match self.invoke_error.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(json!({ "called": capability })),
            }
        }

        async fn list_capabilities(
            &self,
            _handle: &ClientHandle,
            _timeout: Duration,
        ) -> Result<Vec<String>, ProtocolError> {
            Ok(vec!["echo".into()])
        }

        async fn ping(&self, _handle: &ClientHandle, _timeout: Duration) -> Result<(), ProtocolError> {
            Ok(())
        }

        async fn close(&self, _handle: &ClientHandle) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager(client: Arc<ScriptedClient>) -> ConnectionManager {
        ConnectionManager::new(client, ConnectionConfig::default())
    }

    fn instance() -> BackendInstance {
        BackendInstance::new("svc", "127.0.0.1", 9001)
    }

    const T: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_second_call_is_cache_hit() {
        let client = Arc::new(ScriptedClient::default());
        let mgr = manager(client.clone());

        let a = mgr.get_or_create(&instance(), T).await.unwrap();
        let b = mgr.get_or_create(&instance(), T).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(client.inits.load(Ordering::SeqCst), 1);

        let stats = mgr.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.created, 1);
    }

    #[tokio::test]
    async fn test_failed_creation_is_not_cached() {
        let client = Arc::new(ScriptedClient::default());
        client.fail_init.store(true, Ordering::SeqCst);
        let mgr = manager(client.clone());

        let err = mgr.get_or_create(&instance(), T).await.unwrap_err();
        assert!(matches!(err, RouterError::Connection { .. }));
        assert!(!mgr.is_connected("svc:127.0.0.1:9001"));

        client.fail_init.store(false, Ordering::SeqCst);
        mgr.get_or_create(&instance(), T).await.unwrap();
        assert_eq!(client.inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transport_error_invalidates_tool_error_does_not() {
        let client = Arc::new(ScriptedClient::default());
        let mgr = manager(client.clone());
        let key = instance().key();

        *client.invoke_error.lock().unwrap() = Some(ProtocolError::Tool("bad input".into()));
        let err = mgr.invoke(&instance(), "echo", json!({}), T, Instant::now() + T).await.unwrap_err();
        assert!(matches!(err, RouterError::Invocation { .. }));
        assert!(mgr.is_connected(&key));

        *client.invoke_error.lock().unwrap() = Some(ProtocolError::Transport("reset".into()));
        let err = mgr.invoke(&instance(), "echo", json!({}), T, Instant::now() + T).await.unwrap_err();
        assert!(err.is_backend_failure());
        assert!(!mgr.is_connected(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_budget_starts_after_slow_connect() {
        let client = Arc::new(ScriptedClient::default());
        client.init_delay_ms.store(40, Ordering::SeqCst);
        client.invoke_delay_ms.store(500, Ordering::SeqCst);
        let mgr = manager(client.clone());
        let deadline = Instant::now() + Duration::from_millis(100);

        let started = Instant::now();
        let err = mgr
            .invoke(&instance(), "echo", json!({}), Duration::from_millis(50), deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Timeout { stage: "invoke", .. }));
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(!mgr.is_connected(&instance().key()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_eating_whole_budget_keeps_connection() {
        let client = Arc::new(ScriptedClient::default());
        client.init_delay_ms.store(100, Ordering::SeqCst);
        let mgr = manager(client.clone());
        let deadline = Instant::now() + Duration::from_millis(100);

        let err = mgr
            .invoke(&instance(), "echo", json!({}), T, deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Timeout { stage: "invoke", .. }));
        assert!(mgr.is_connected(&instance().key()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_creation_still_populates_cache() {
        let client = Arc::new(ScriptedClient::default());
        client.init_delay_ms.store(200, Ordering::SeqCst);
        let mgr = manager(client.clone());

        let err = mgr
            .get_or_create(&instance(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Timeout { stage: "connect", .. }));

        time::sleep(Duration::from_millis(300)).await;
        assert!(mgr.is_connected(&instance().key()));
        mgr.get_or_create(&instance(), T).await.unwrap();
        assert_eq!(client.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_creation_discards_result() {
        let client = Arc::new(ScriptedClient::default());
        client.init_delay_ms.store(100, Ordering::SeqCst);
        let mgr = Arc::new(manager(client.clone()));

        let waiter = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.get_or_create(&instance(), T).await })
        };
        time::sleep(Duration::from_millis(10)).await;
        mgr.close(&instance().key()).await;

        assert!(waiter.await.unwrap().is_err());
        assert!(!mgr.is_connected(&instance().key()));
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connections_are_reaped() {
        let client = Arc::new(ScriptedClient::default());
        let mgr = manager(client.clone());

        mgr.get_or_create(&instance(), T).await.unwrap();
        assert_eq!(mgr.reap_expired().await, 0);

        time::advance(Duration::from_secs(601)).await;
        assert_eq!(mgr.reap_expired().await, 1);
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.stats().live, 0);
    }

    #[tokio::test]
    async fn test_close_service_and_close_all() {
        let client = Arc::new(ScriptedClient::default());
        let mgr = manager(client.clone());

        mgr.get_or_create(&BackendInstance::new("a", "h", 1), T).await.unwrap();
        mgr.get_or_create(&BackendInstance::new("a", "h", 2), T).await.unwrap();
        mgr.get_or_create(&BackendInstance::new("b", "h", 1), T).await.unwrap();

        assert_eq!(mgr.close_service("a").await, 2);
        mgr.close("a:h:1").await;
        assert_eq!(mgr.close_all().await, 1);
        assert_eq!(client.closes.load(Ordering::SeqCst), 3);
    }
}
