//! Metadata persistence gateway
//!
//! Each first-occurrence stage event writes the participant's full snapshot
//! to the configured store, replacing the previous one. Callers enqueue the
//! snapshot and return immediately; a single writer task drains the queue in
//! order, so the last document written for a participant is always the
//! newest. A failed write is logged and reported to the observer, never
//! retried; the in-memory registry stays authoritative.

pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use studylink_common::{time, Result};
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::registry::ParticipantSnapshot;

pub use store::{DirectoryStore, HttpStore, MemoryStore, ScpStore, SnapshotStore};

/// Document written to the store
#[derive(Debug, Serialize)]
pub struct SnapshotDocument<'a> {
    #[serde(flatten)]
    pub snapshot: &'a ParticipantSnapshot,
    #[serde(rename = "stopTime", with = "chrono::serde::ts_milliseconds")]
    pub stop_time: DateTime<Utc>,
}

impl<'a> SnapshotDocument<'a> {
    /// Document stamped with the current time
    pub fn now(snapshot: &'a ParticipantSnapshot) -> Self {
        Self {
            snapshot,
            stop_time: time::now(),
        }
    }
}

/// Completion report for one snapshot write
#[derive(Debug)]
pub struct PersistOutcome {
    pub participant: Uuid,
    pub result: Result<()>,
}

struct PendingWrite {
    participant: Uuid,
    document: Result<Vec<u8>>,
}

/// Fire-and-forget writer in front of a [`SnapshotStore`]
#[derive(Clone)]
pub struct PersistenceGateway {
    queue: mpsc::UnboundedSender<PendingWrite>,
    store_name: &'static str,
}

impl PersistenceGateway {
    /// Start the writer task; must be called from within a Tokio runtime
    ///
    /// Every completed write is reported on `observer` when one is given.
    pub fn start(
        store: Arc<dyn SnapshotStore>,
        observer: Option<mpsc::UnboundedSender<PersistOutcome>>,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let store_name = store.name();
        tokio::spawn(run_writer(store, rx, observer));
        Self { queue, store_name }
    }

    pub fn store_name(&self) -> &'static str {
        self.store_name
    }

    /// Stamp `stopTime`, serialize and enqueue `snapshot`
    pub fn persist(&self, snapshot: &ParticipantSnapshot) {
        let document = serde_json::to_vec(&SnapshotDocument::now(snapshot)).map_err(Into::into);
        let pending = PendingWrite {
            participant: snapshot.id,
            document,
        };
        if self.queue.send(pending).is_err() {
            error!(participant = %snapshot.id, "Snapshot writer has stopped, snapshot dropped");
        }
    }
}

async fn run_writer(
    store: Arc<dyn SnapshotStore>,
    mut rx: mpsc::UnboundedReceiver<PendingWrite>,
    observer: Option<mpsc::UnboundedSender<PersistOutcome>>,
) {
    while let Some(PendingWrite {
        participant,
        document,
    }) = rx.recv().await
    {
        let result = match document {
            Ok(bytes) => store.write(participant, bytes).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => debug!(participant = %participant, store = store.name(), "Snapshot saved"),
            Err(e) => error!(
                participant = %participant,
                store = store.name(),
                "Error saving snapshot: {}",
                e
            ),
        }

        if let Some(observer) = &observer {
            let _ = observer.send(PersistOutcome {
                participant,
                result,
            });
        }
    }
    debug!("Snapshot writer stopped");
}
