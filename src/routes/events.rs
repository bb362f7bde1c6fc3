use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};

use crate::models::StreamEvent;
use crate::service::chat_service::ChatService;

/// GET `/events/{conv_id}` — Server-Sent Events, one JSON event per `data:`
/// line; the response ends after `done` or `error`.
pub async fn events_handler(
    Path(conv_id): Path<String>,
    State(svc): State<ChatService>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = svc.events(conv_id).map(|event| Ok::<_, Infallible>(to_sse(&event)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_sse(event: &StreamEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        // Unreachable for this enum; keep the stream well-formed anyway.
        Err(_) => Event::default().data(r#"{"type":"error","text":"serialization failed"}"#),
    }
}
