//! Stage event feed for the lab's recording console
//!
//! Every first-occurrence stage event is published here as well as on the
//! participant's socket. Lab staff watch the feed over SSE at
//! `/private/events`.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use studylink_common::Stage;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One stage transition as seen by the monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub participant: Uuid,
    pub video: String,
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
}

/// Broadcasts stage events to connected monitor clients
#[derive(Clone)]
pub struct MonitorBroadcaster {
    tx: broadcast::Sender<StageEvent>,
}

impl MonitorBroadcaster {
    /// `capacity` events are buffered per slow client before it lags
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; dropped when nobody is watching
    pub fn publish(&self, event: StageEvent) {
        if let Ok(count) = self.tx.send(event) {
            debug!("Stage event sent to {} monitor clients", count);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// SSE stream of stage events, named by stage
    pub fn subscribe_stream(&self) -> impl Stream<Item = Result<Event, Infallible>> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|result| async move {
            match result {
                Ok(event) => Event::default()
                    .event(event.stage.as_str())
                    .json_data(&event)
                    .ok()
                    .map(Ok),
                Err(e) => {
                    warn!("Monitor client lagging: {:?}", e);
                    None
                }
            }
        })
    }

    pub fn handle_sse_connection(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        info!("Monitor client connected, total clients: {}", self.client_count() + 1);

        Sse::new(self.subscribe_stream()).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
    }
}

impl Default for MonitorBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
