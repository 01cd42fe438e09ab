use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::{
    error::AttemptError,
    metrics::SSE_CONNECTIONS_ACTIVE,
    models::{attempt::LiveAttemptSnapshot, events::AttemptEvent},
    services::AppState,
};

/// Live events of one attempt.
/// GET /api/v1/attempts/{id}/stream
///
/// Opens with a `snapshot` event, then relays attempt events until a
/// terminal one has been sent.
pub async fn attempt_stream(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AttemptError> {
    let handle = state.registry.get(attempt_id).await?;
    // Subscribe before the snapshot so no event falls between the two.
    let events = handle.subscribe();
    let snapshot = handle.snapshot().await?;

    tracing::info!(
        "Client connected to SSE stream: attempt={}, phase={:?}",
        attempt_id,
        snapshot.phase
    );

    Ok(Sse::new(create_event_stream(attempt_id, snapshot, events)).keep_alive(KeepAlive::default()))
}

/// Decrements the connection gauge when the stream is dropped.
struct ConnectionGuard {
    attempt_id: Uuid,
}

impl ConnectionGuard {
    fn new(attempt_id: Uuid) -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        Self { attempt_id }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
        tracing::debug!("SSE stream closed: attempt={}", self.attempt_id);
    }
}

enum StreamState {
    Snapshot(LiveAttemptSnapshot),
    Relaying,
    Done,
}

fn snapshot_event(snapshot: &LiveAttemptSnapshot) -> Event {
    Event::default()
        .event("snapshot")
        .data(serde_json::to_string(snapshot).unwrap_or_else(|_| "{}".to_string()))
}

fn attempt_event(event: &AttemptEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .data(event.to_sse_data())
}

fn create_event_stream(
    attempt_id: Uuid,
    snapshot: LiveAttemptSnapshot,
    events: broadcast::Receiver<AttemptEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = ConnectionGuard::new(attempt_id);

    stream::unfold(
        (StreamState::Snapshot(snapshot), events, guard),
        |(state, mut events, guard)| async move {
            match state {
                StreamState::Done => None,
                StreamState::Snapshot(snapshot) => {
                    // A finished attempt has nothing more to send.
                    let next = if snapshot.phase.is_terminal() {
                        StreamState::Done
                    } else {
                        StreamState::Relaying
                    };
                    Some((Ok(snapshot_event(&snapshot)), (next, events, guard)))
                }
                StreamState::Relaying => loop {
                    match events.recv().await {
                        Ok(event) => {
                            let next = if event.is_terminal() {
                                StreamState::Done
                            } else {
                                StreamState::Relaying
                            };
                            return Some((Ok(attempt_event(&event)), (next, events, guard)));
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                "SSE client lagging, skipped {} events: attempt={}",
                                skipped,
                                guard.attempt_id
                            );
                        }
                        Err(RecvError::Closed) => return None,
                    }
                },
            }
        },
    )
}
