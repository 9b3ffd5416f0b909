//! Routing and health events.
//!
//! # Responsibilities
//! - Describe every completed routing attempt and health check
//! - Hand them to a sink without blocking the caller
//! - Degrade to a log line when the sink cannot keep up

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};

use crate::observability::metrics;

/// Something worth persisting.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterEvent {
    RoutingCompleted {
        request_id: String,
        service: Option<String>,
        backend: Option<String>,
        capability: String,
        strategy: String,
        success: bool,
        error_code: Option<i32>,
        elapsed_ms: u64,
        timestamp: u64,
    },
    HealthChecked {
        backend: String,
        service: String,
        healthy: bool,
        level: &'static str,
        elapsed_ms: u64,
        error: Option<String>,
        timestamp: u64,
    },
}

impl RouterEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RouterEvent::RoutingCompleted { .. } => "routing_completed",
            RouterEvent::HealthChecked { .. } => "health_checked",
        }
    }
}

/// Fire-and-forget consumer of [`RouterEvent`]s.
pub trait EventSink: Send + Sync + 'static {
    /// Must return promptly and never panic.
    fn publish(&self, event: RouterEvent);
}

/// Buffers events in a bounded channel for a drain task.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<RouterEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<RouterEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: RouterEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let event = match err {
                mpsc::error::TrySendError::Full(e) | mpsc::error::TrySendError::Closed(e) => e,
            };
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_event_dropped(event.kind());
            tracing::warn!(kind = event.kind(), "Event sink unavailable, logging locally");
            log_event(&event);
        }
    }
}

fn log_event(event: &RouterEvent) {
    match event {
        RouterEvent::RoutingCompleted {
            request_id,
            service,
            backend,
            capability,
            strategy,
            success,
            error_code,
            elapsed_ms,
            ..
        } => tracing::info!(
            target: "router_events",
            request_id = %request_id,
            service = service.as_deref().unwrap_or("-"),
            backend = backend.as_deref().unwrap_or("-"),
            capability = %capability,
            strategy = %strategy,
            success,
            error_code = error_code.unwrap_or(0),
            elapsed_ms,
            "routing completed"
        ),
        RouterEvent::HealthChecked {
            backend,
            healthy,
            level,
            elapsed_ms,
            error,
            ..
        } => tracing::info!(
            target: "router_events",
            backend = %backend,
            healthy,
            level,
            elapsed_ms,
            error = error.as_deref().unwrap_or("-"),
            "health check completed"
        ),
    }
}

/// Drain buffered events until shutdown, then flush what is left.
pub async fn run_event_drain(
    mut rx: mpsc::Receiver<RouterEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = shutdown.recv() => {
                while let Ok(event) = rx.try_recv() {
                    log_event(&event);
                }
                tracing::info!("Event drain received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
