//! Server-sent stream of task lifecycle events.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::Stream;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::state::AppState;

/// Stream every task event published after the client connected.
pub async fn task_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Event stream subscriber connected");
    let stream = BroadcastStream::new(state.events.subscribe()).map(|item| match item {
        Ok(event) => {
            let sse = Event::default().event("task");
            Ok(sse.json_data(&event).unwrap_or_else(|e| {
                warn!(error = %e, "Failed to encode task event");
                Event::default().comment("encoding error")
            }))
        }
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Event stream lagged, skipping events");
            Ok(Event::default().comment(format!("skipped {skipped} events")))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
