//! Server-Sent Events support

use crate::orchestrator::{TurnChunk, TurnStream};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;

/// Forward a streamed turn as `chunk` events. The response ends with the
/// turn's final chunk.
pub fn sse_stream(chunks: TurnStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = chunks.map(|chunk| Ok(chunk_to_event(&chunk)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn chunk_to_event(chunk: &TurnChunk) -> Event {
    let data = match serde_json::to_string(chunk) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode stream chunk");
            String::from("{}")
        }
    };
    Event::default().event("chunk").data(data)
}
