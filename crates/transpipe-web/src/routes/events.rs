//! SSE event streams and the liveness probe: an `async_stream::stream!`
//! loop yielding `axum::response::sse::Event`s, forwarding whatever the
//! room's `EventBus` broadcasts.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;
use transpipe_core::events::Room;

/// `GET /clients/{client_id}/events`. SSE stream for the `client:{id}` room.
pub async fn client_events(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    room_stream(&state, Room::client(&client_id))
}

/// `GET /materials/{id}/events`. SSE stream for the `material:{id}` room.
pub async fn material_events(
    State(state): State<Arc<AppState>>,
    Path(material_id): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    room_stream(&state, Room::material(&material_id))
}

fn room_stream(state: &Arc<AppState>, room: Room) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.events.subscribe(room);

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(SseEvent::default().event("message").data(json));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("SSE subscriber lagged, skipped {skipped} event(s)");
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// `GET /healthz`. Trivial liveness probe.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}
