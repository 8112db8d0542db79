use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt, stream};

use crate::ui_event::UiEvent;

pub fn build_sse_response<S>(
    events: S,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send>
where
    S: Stream<Item = UiEvent> + Send + 'static,
{
    let events = events.map(|event| {
        Ok(Event::default()
            .event(event.event_name())
            .data(event.payload()))
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// A stream that reports `message` and ends.
///
/// Used instead of an HTTP error status so `EventSource` does not reconnect.
pub fn single_error_sse(
    message: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    build_sse_response(stream::iter([
        UiEvent::Error { message },
        UiEvent::Done { committed: false },
    ]))
}
