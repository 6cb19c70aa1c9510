use crate::api::requests::EventParams;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use memo::CacheEvent;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    backend: Vec<String>,
    event_type: Vec<String>,
}

impl EventFilter {
    /// CSV support for multiple values, e.g. `?backend=redis&type=hit,miss`
    fn from_params(params: EventParams) -> Self {
        Self {
            backend: split_csv(params.backend.as_deref()),
            event_type: split_csv(params.event_type.as_deref()),
        }
    }

    /// Empty criteria match everything.
    fn matches(&self, event: &CacheEvent) -> bool {
        let backend_ok =
            self.backend.is_empty() || self.backend.iter().any(|b| b == event.backend());
        let type_ok =
            self.event_type.is_empty() || self.event_type.iter().any(|t| t == event.kind());
        backend_ok && type_ok
    }
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// SSE endpoint that streams cache hit/miss/store events to clients
pub async fn stream_events(
    State(state): State<AppState>,
    Query(params): Query<EventParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = EventFilter::from_params(params);

    tracing::info!(
        "New SSE client connected. Filters: backend={:?}, type={:?}",
        filter.backend,
        filter.event_type
    );

    let rx = state.event_channel.subscribe();
    let stream = BroadcastStream::new(rx);

    let filtered_stream = stream.filter_map(move |result| {
        let send = match result {
            Ok(event) => {
                let should_send = filter.matches(&event);
                tracing::debug!(
                    "Received event: {} key={} should_send={}",
                    event.kind(),
                    event.key(),
                    should_send
                );
                should_send.then(|| Ok(to_sse_event(&event)))
            }
            Err(BroadcastStreamRecvError::Lagged(n)) => Some(Ok(Event::default()
                .event("error")
                .data(format!("Lagged by {} events", n)))),
        };
        async move { send }
    });

    Sse::new(filtered_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Convert a CacheEvent to an SSE Event named `cache.<kind>`
fn to_sse_event(event: &CacheEvent) -> Event {
    Event::default()
        .event(format!("cache.{}", event.kind()))
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}
