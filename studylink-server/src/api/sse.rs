//! Server-Sent Events feed of stage transitions

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /private/events - SSE stream of first-occurrence stage events
///
/// Gated by the access gate like the rest of `/private`.
pub async fn monitor_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.monitor.handle_sse_connection()
}
