//! A single push session and its outbound channel.

use futures_util::Stream;
use serde::Serialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use crate::protocol::message::now_millis;

pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_DISCONNECTED: &str = "disconnected";
pub const EVENT_RESPONSE: &str = "response";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {0} is closed")]
    Closed(String),

    #[error("session {0} outbound buffer is full")]
    Backpressure(String),

    #[error("failed to encode event: {0}")]
    Encode(String),
}

/// Lifecycle of a session. `Disconnected` and `Timeout` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Connected = 1,
    Disconnected = 2,
    Timeout = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Connecting,
            1 => SessionState::Connected,
            2 => SessionState::Disconnected,
            _ => SessionState::Timeout,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Timeout)
    }
}

/// A named event with a string payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub event: String,
    pub data: String,
}

impl PushEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    pub(crate) fn heartbeat() -> Self {
        Self::new(EVENT_HEARTBEAT, serde_json::json!({ "timestamp": now_millis() }).to_string())
    }
}

/// Receiving half handed to the caller on connect.
///
/// Ends once the session is closed and every buffered event was read.
#[derive(Debug)]
pub struct SessionStream {
    rx: mpsc::Receiver<PushEvent>,
}

impl SessionStream {
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PushEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for SessionStream {
    type Item = PushEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub client_id: String,
    pub state: SessionState,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub message_count: u64,
    pub error_count: u64,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug)]
pub struct PushSession {
    id: String,
    client_id: String,
    state: AtomicU8,
    created_at: Instant,
    last_active: Mutex<Instant>,
    timeout: Duration,
    message_count: AtomicU64,
    error_count: AtomicU64,
    metadata: HashMap<String, String>,
    tx: Mutex<Option<mpsc::Sender<PushEvent>>>,
}

impl PushSession {
    pub(crate) fn new(
        id: String,
        client_id: String,
        metadata: HashMap<String, String>,
        timeout: Duration,
        capacity: usize,
    ) -> (Self, SessionStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let session = Self {
            id,
            client_id,
            state: AtomicU8::new(SessionState::Connecting as u8),
            created_at: now,
            last_active: Mutex::new(now),
            timeout,
            message_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            metadata,
            tx: Mutex::new(Some(tx)),
        };
        (session, SessionStream { rx })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `from -> to`; fails if another transition won.
    pub(crate) fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn touch(&self) {
        if let Ok(mut last) = self.last_active.lock() {
            *last = Instant::now();
        }
    }

    pub fn idle(&self) -> Duration {
        self.last_active
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    pub fn is_timed_out(&self) -> bool {
        self.idle() > self.timeout
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Queue an event without waiting. Success refreshes the activity timestamp.
    pub(crate) fn push(&self, event: PushEvent) -> Result<(), SessionError> {
        let sender = self
            .tx
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| SessionError::Closed(self.id.clone()))?;

        match sender.try_send(event) {
            Ok(()) => {
                self.touch();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(SessionError::Backpressure(self.id.clone()))
            }
            Err(TrySendError::Closed(_)) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(SessionError::Closed(self.id.clone()))
            }
        }
    }

    /// Push a caller-visible message and count it.
    pub(crate) fn push_message(&self, event: PushEvent) -> Result<(), SessionError> {
        self.push(event)?;
        self.message_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Enter `state`, emit the final event and complete the channel.
    pub(crate) fn finish(&self, state: SessionState, reason: &str) {
        self.state.store(state as u8, Ordering::Release);
        let sender = self.tx.lock().ok().and_then(|mut guard| guard.take());
        if let Some(tx) = sender {
            let data = serde_json::json!({ "sessionId": self.id, "reason": reason });
            let _ = tx.try_send(PushEvent::new(EVENT_DISCONNECTED, data.to_string()));
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            client_id: self.client_id.clone(),
            state: self.state(),
            age_ms: self.created_at.elapsed().as_millis() as u64,
            idle_ms: self.idle().as_millis() as u64,
            message_count: self.message_count(),
            error_count: self.error_count(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(capacity: usize) -> (PushSession, SessionStream) {
        PushSession::new(
            "s-1".into(),
            "client-a".into(),
            HashMap::new(),
            Duration::from_secs(60),
            capacity,
        )
    }

    #[test]
    fn test_state_transitions_are_exclusive() {
        let (s, _rx) = session(4);
        assert_eq!(s.state(), SessionState::Connecting);
        assert!(s.transition(SessionState::Connecting, SessionState::Connected));
        assert!(!s.transition(SessionState::Connecting, SessionState::Connected));
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn test_full_channel_is_backpressure() {
        let (s, _rx) = session(1);
        s.push_message(PushEvent::new("a", "1")).unwrap();
        let err = s.push_message(PushEvent::new("b", "2")).unwrap_err();

        assert_eq!(err, SessionError::Backpressure("s-1".into()));
        assert_eq!(s.message_count(), 1);
        assert_eq!(s.error_count(), 1);
    }

    #[test]
    fn test_dropped_receiver_is_closed() {
        let (s, rx) = session(4);
        drop(rx);
        assert_eq!(
            s.push(PushEvent::new("a", "1")).unwrap_err(),
            SessionError::Closed("s-1".into())
        );
    }

    #[tokio::test]
    async fn test_finish_sends_disconnected_then_ends_stream() {
        let (s, mut rx) = session(4);
        s.finish(SessionState::Disconnected, "closed");

        let last = rx.recv().await.unwrap();
        assert_eq!(last.event, EVENT_DISCONNECTED);
        assert!(rx.recv().await.is_none());
        assert!(s.state().is_terminal());
        assert!(matches!(s.push(PushEvent::new("a", "1")), Err(SessionError::Closed(_))));
    }
}
