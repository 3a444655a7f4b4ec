//! Server-Sent Events from the ship.
//!
//! The ship pushes channel frames as SSE:
//!
//! ```text
//! id: 4
//! data: {"response":"diff","id":2,"json":{...}}
//!
//! ```
//!
//! Parsing is done by `eventsource-stream`; this module turns its events into
//! [`SseEvent`]s carrying the channel sequence number.

use crate::error::ChannelError;
use crate::transport::EventStream;
use eventsource_stream::{Event, Eventsource};
use futures::{Stream, StreamExt};
use std::fmt::Display;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// The event id as a channel sequence number.
    pub fn event_id(&self) -> Option<u64> {
        self.id.as_deref().and_then(|id| id.trim().parse().ok())
    }
}

impl From<Event> for SseEvent {
    fn from(event: Event) -> Self {
        Self {
            id: (!event.id.is_empty()).then_some(event.id),
            event: (!event.event.is_empty()).then_some(event.event),
            data: event.data,
        }
    }
}

/// Decode an HTTP body stream into channel events.
pub fn decode_event_stream<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    body.eventsource()
        .map(|event| {
            event.map(SseEvent::from).map_err(|e| ChannelError::EventStream {
                message: e.to_string(),
            })
        })
        .boxed()
}
