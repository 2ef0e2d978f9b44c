//! Helpers for building server-sent event frames.

use axum::response::sse::Event;
use serde::Serialize;

/// Build a named SSE event carrying a JSON payload.
///
/// Serialization of the payload types used on the wire is infallible in
/// practice; if it ever fails the frame degrades to a generic `error` event
/// rather than tearing down the stream.
pub fn json_event<T: Serialize>(name: &str, data: &T) -> Event {
    match Event::default().event(name).json_data(data) {
        Ok(event) => event,
        Err(err) => {
            tracing::error!(event = name, error = %err, "failed to serialize SSE payload");
            Event::default()
                .event("error")
                .data(r#"{"error":"internal serialization failure"}"#)
        }
    }
}
