//! Server-Sent Events stream of pipeline progress

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct EventStreamParams {
    /// Restrict the stream to one event type (e.g. "SightingRecorded")
    pub event_type: Option<String>,
}

/// GET /events - SSE stream of pipeline events
///
/// Every stage of the pipeline reports here: accepted uploads, stored
/// crops, identifications, catalog additions, recorded and skipped
/// sightings, and job failures. `?event_type=` narrows the stream.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(params): Query<EventStreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(filter = ?params.event_type, "New SSE client connected");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                // Heartbeat every 15 seconds keeps idle connections open
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                Ok(event) = rx.recv() => {
                    let event_type = event.event_type();

                    if let Some(ref wanted) = params.event_type {
                        if wanted != event_type {
                            continue;
                        }
                    }

                    match serde_json::to_string(&event) {
                        Ok(event_json) => {
                            debug!("SSE: Broadcasting event: {}", event_type);
                            yield Ok(Event::default()
                                .event(event_type)
                                .data(event_json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
