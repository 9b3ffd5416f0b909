//! Push session manager.
//!
//! # Responsibilities
//! - Open sessions and run one heartbeat task per session
//! - Deliver named events to one session, one client or everyone
//! - Reclaim sessions that stopped being active
//! - Bridge routed responses onto a session
//!
//! # Design Decisions
//! - Sessions live in a concurrent map keyed by id; no global lock
//! - Heartbeat tasks check their own continuation condition each tick
//! - Closing is idempotent: unknown or already closed ids are a no-op

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::config::schema::SessionConfig;
use crate::observability::metrics;
use crate::protocol::{RouterMessage, RoutedResponse};
use crate::routing::{RouteTarget, RoutingEngine};
use crate::session::push::{
    PushEvent, PushSession, SessionError, SessionSnapshot, SessionState, SessionStream,
    EVENT_CONNECTED, EVENT_RESPONSE,
};

pub struct SessionManager {
    sessions: DashMap<String, Arc<PushSession>>,
    engine: Arc<RoutingEngine>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(engine: Arc<RoutingEngine>, config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            engine,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session for `client_id`. The stream starts with a `connected` event.
    pub fn connect(
        self: &Arc<Self>,
        client_id: &str,
        metadata: HashMap<String, String>,
    ) -> (String, SessionStream) {
        let id = Uuid::new_v4().to_string();
        let (session, stream) = PushSession::new(
            id.clone(),
            client_id.to_string(),
            metadata,
            Duration::from_millis(self.config.session_timeout_ms),
            self.config.channel_capacity,
        );
        let session = Arc::new(session);
        self.sessions.insert(id.clone(), session.clone());

        session.transition(SessionState::Connecting, SessionState::Connected);
        let hello = serde_json::json!({ "sessionId": id, "clientId": client_id });
        if let Err(e) = session.push(PushEvent::new(EVENT_CONNECTED, hello.to_string())) {
            tracing::warn!(session_id = %id, error = %e, "Failed to send connected event");
        }

        let period = Duration::from_secs(self.config.heartbeat_interval_secs);
        tokio::spawn(heartbeat_loop(Arc::downgrade(self), session, period));

        metrics::record_active_sessions(self.sessions.len());
        tracing::info!(session_id = %id, client_id = %client_id, "Push session connected");
        (id, stream)
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<PushSession>> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Push a named event onto one session.
    pub fn send_message(&self, session_id: &str, event: &str, data: &str) -> Result<(), SessionError> {
        let session = self
            .session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        self.deliver(&session, PushEvent::new(event, data))
    }

    /// Client-initiated liveness signal.
    pub fn heartbeat(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self
            .session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if session.state() != SessionState::Connected {
            return Err(SessionError::Closed(session_id.to_string()));
        }
        session.touch();
        Ok(())
    }

    /// Push to the oldest session of `client_id`.
    pub fn send_to_client(&self, client_id: &str, event: &str, data: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .iter()
            .filter(|s| s.client_id() == client_id)
            .min_by_key(|s| s.created_at())
            .map(|s| s.value().clone())
            .ok_or_else(|| SessionError::NotFound(client_id.to_string()))?;
        self.deliver(&session, PushEvent::new(event, data))
    }

    /// Push a named event onto every connected session. Returns how many accepted it.
    pub fn broadcast(&self, event: &str, data: &str) -> usize {
        let targets: Vec<_> = self.sessions.iter().map(|s| s.value().clone()).collect();
        let delivered = targets
            .iter()
            .filter(|session| self.deliver(session, PushEvent::new(event, data)).is_ok())
            .count();
        tracing::debug!(event = %event, delivered, total = targets.len(), "Broadcast to sessions");
        delivered
    }

    /// Route `message` and push the response onto the session as a `response` event.
    pub async fn route_to_session(
        &self,
        session_id: &str,
        target: &RouteTarget,
        message: &RouterMessage,
        timeout: Option<Duration>,
    ) -> Result<RoutedResponse, SessionError> {
        let session = self
            .session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if session.state() != SessionState::Connected {
            return Err(SessionError::Closed(session_id.to_string()));
        }

        let response = self.engine.dispatch(target, message, timeout).await;
        let data =
            serde_json::to_string(&response).map_err(|e| SessionError::Encode(e.to_string()))?;
        self.deliver(&session, PushEvent::new(EVENT_RESPONSE, data))?;
        Ok(response)
    }

    /// Close a session. Unknown or already closed ids are ignored.
    pub fn close_session(&self, session_id: &str) -> bool {
        self.terminate(session_id, SessionState::Disconnected, "closed")
    }

    pub fn close_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        ids.iter()
            .filter(|id| self.terminate(id, SessionState::Disconnected, "shutdown"))
            .count()
    }

    /// Reclaim every session idle past its timeout.
    pub fn sweep_timeouts(&self) -> usize {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.is_timed_out())
            .map(|s| s.key().clone())
            .collect();

        let reclaimed = expired
            .iter()
            .filter(|id| self.terminate(id, SessionState::Timeout, "timeout"))
            .count();
        if reclaimed > 0 {
            tracing::info!(reclaimed, remaining = self.sessions.len(), "Reclaimed idle sessions");
        }
        reclaimed
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut list: Vec<_> = self.sessions.iter().map(|s| s.snapshot()).collect();
        list.sort_by(|a, b| b.age_ms.cmp(&a.age_ms));
        list
    }

    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.sweep_interval_secs);
        let mut ticker = time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_timeouts();
                }
                _ = shutdown.recv() => {
                    let closed = self.close_all();
                    tracing::info!(closed, "Session sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn deliver(&self, session: &PushSession, event: PushEvent) -> Result<(), SessionError> {
        match session.push_message(event) {
            Err(SessionError::Closed(id)) => {
                self.terminate(&id, SessionState::Disconnected, "channel closed");
                Err(SessionError::Closed(id))
            }
            Err(SessionError::Backpressure(id)) => {
                tracing::warn!(session_id = %id, "Session buffer full, event rejected");
                Err(SessionError::Backpressure(id))
            }
            other => other,
        }
    }

    fn terminate(&self, session_id: &str, state: SessionState, reason: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return false;
        };
        session.finish(state, reason);
        metrics::record_active_sessions(self.sessions.len());
        tracing::info!(
            session_id = %session_id,
            client_id = %session.client_id(),
            state = ?state,
            reason = %reason,
            messages = session.message_count(),
            "Push session ended"
        );
        true
    }
}

async fn heartbeat_loop(manager: Weak<SessionManager>, session: Arc<PushSession>, period: Duration) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        if session.state() != SessionState::Connected {
            break;
        }
        match session.push(PushEvent::heartbeat()) {
            Ok(()) => {}
            Err(SessionError::Backpressure(_)) => {
                tracing::debug!(session_id = %session.id(), "Heartbeat skipped, buffer full");
            }
            Err(e) => {
                tracing::debug!(session_id = %session.id(), error = %e, "Heartbeat failed");
                if let Some(manager) = manager.upgrade() {
                    manager.terminate(session.id(), SessionState::Disconnected, "heartbeat failed");
                }
                break;
            }
        }
    }
}
