use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiResult;
use pkg_state::watch::WatchEvent;

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub seq: Option<u64>,
}

fn to_sse(event: &WatchEvent) -> Option<Event> {
    serde_json::to_string(event)
        .ok()
        .map(|data| Event::default().id(event.seq.to_string()).data(data))
}

/// GET /api/v1/watch: SSE stream of store events, replaying buffered ones after `seq` first.
pub async fn watch_events(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let prefix = query.prefix.unwrap_or_default();
    let from_seq = query.seq.unwrap_or(0);

    info!("Watch subscription: prefix='{}', from_seq={}", prefix, from_seq);

    // Subscribe before reading the buffer so nothing falls between the two.
    let rx = state.store.event_log.subscribe()?;
    let buffered = state.store.event_log.events_since(from_seq).await;
    let last_buffered = buffered.last().map_or(from_seq, |e| e.seq);

    let live_prefix = prefix.clone();
    let buffered_stream = tokio_stream::iter(
        buffered
            .into_iter()
            .filter(move |e| e.key.starts_with(&prefix))
            .filter_map(|e| to_sse(&e).map(Ok::<_, Infallible>)),
    );

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.seq > last_buffered && event.key.starts_with(&live_prefix) => {
            to_sse(&event).map(Ok::<_, Infallible>)
        }
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            warn!("Watch subscriber lagged by {} events", n);
            None
        }
    });

    Ok(Sse::new(buffered_stream.chain(live_stream)).keep_alive(KeepAlive::default()))
}
