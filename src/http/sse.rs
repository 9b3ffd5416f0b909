//! Server-sent events transport for push sessions.

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use std::convert::Infallible;
use uuid::Uuid;

use crate::http::server::AppState;

/// `GET /sse?client_id=..`; remaining query parameters become session metadata.
pub async fn connect(
    State(state): State<AppState>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let client_id = params
        .remove("client_id")
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let (session_id, stream) = state.sessions.connect(&client_id, params);
    tracing::debug!(session_id = %session_id, client_id = %client_id, "SSE stream opened");

    let events = stream.map(|ev| Ok(Event::default().event(ev.event).data(ev.data)));
    Sse::new(events).keep_alive(KeepAlive::default())
}
