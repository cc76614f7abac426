use std::{convert::Infallible, time::Duration};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    events::{bridge::BridgeSession, now_millis, BroadcastMessage},
    state::AppState,
    types::RecentMedia,
};

/// Lines buffered for a slow bridge consumer before forwards start failing.
const BRIDGE_BUFFER: usize = 256;
const RECENT_MEDIA_LIMIT: u32 = 10;

/// Entry point for the processing pipeline: apply side effects, forward to the
/// bridge, then fan out to the SSE subscribers.
pub async fn post_message(
    State(state): State<AppState>,
    Json(mut message): Json<BroadcastMessage>,
) -> AppResult<Json<Value>> {
    if message.timestamp <= 0.0 {
        message.timestamp = now_millis();
    }

    state.ingest.apply(&message).await;

    if state.bridge.forward(&message) {
        state.metrics.inc_bridge_forwards();
    }
    let delivery = state.hub.broadcast(&message);
    tracing::debug!(
        "Relayed {} message to {} subscribers ({} dropped)",
        message.kind,
        delivery.delivered,
        delivery.dropped
    );

    Ok(Json(json!({ "success": true })))
}

/// Server-sent events for the web UI. The stream ends when the server shuts down,
/// so open browser tabs never hold up a restart.
pub async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe();
    tracing::info!("SSE client {} connected", subscription.id());
    let stream = subscription
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(|text| Ok::<Event, Infallible>(Event::default().data(text)));

    let every = Duration::from_secs(state.config.events.keep_alive_secs.max(1));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(every).text("keep-alive"))
}

/// Long-lived NDJSON stream that receives every forwarded pipeline message.
/// Opening a new session ends the previous one; shutdown ends all of them.
pub async fn bridge(State(state): State<AppState>) -> Response {
    let session = BridgeSession::open(&state.bridge, BRIDGE_BUFFER);
    tracing::info!("Bridge session opened");
    let lines = session.take_until(state.shutdown.clone().cancelled_owned());
    let body = Body::from_stream(lines.map(Ok::<String, Infallible>));
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}

pub async fn recent_media(State(state): State<AppState>) -> AppResult<Json<Vec<RecentMedia>>> {
    Ok(Json(state.store.recent_media(RECENT_MEDIA_LIMIT).await?))
}
