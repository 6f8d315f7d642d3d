//! Participant registry
//!
//! One record per participant identifier, created on first registration and
//! kept for the lifetime of the process. The registry owns each
//! participant's live connection handle; other components reach the socket
//! only through [`ParticipantRecord::relay`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use studylink_common::{time, Identifier, ServerMessage, Stage, StageMark};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Sending half of a participant socket's outbound queue
pub type ConnectionSender = mpsc::UnboundedSender<ServerMessage>;

/// Handle to one live participant connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    serial: u64,
    tx: ConnectionSender,
}

impl ConnectionHandle {
    /// Serial number distinguishing this connection from earlier ones
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Queue a message for the socket; false if the socket has gone away
    pub fn send(&self, message: ServerMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// What happened to a relayed stage event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Delivered,
    /// No connection bound; the event is dropped
    NoConnection,
    /// The bound connection has closed; the event is dropped
    Closed,
}

/// The six per-video stage flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    pub start_video: StageMark,
    pub stop_video: StageMark,
    pub start_emotion: StageMark,
    pub stop_emotion: StageMark,
    pub start_quiz: StageMark,
    pub stop_quiz: StageMark,
}

impl StageFlags {
    /// Flag for a per-video stage; `None` for the terminal stage
    pub fn get(&self, stage: Stage) -> Option<StageMark> {
        match stage {
            Stage::StartVideo => Some(self.start_video),
            Stage::StopVideo => Some(self.stop_video),
            Stage::StartEmotion => Some(self.start_emotion),
            Stage::StopEmotion => Some(self.stop_emotion),
            Stage::StartQuiz => Some(self.start_quiz),
            Stage::StopQuiz => Some(self.stop_quiz),
            Stage::EndStudy => None,
        }
    }

    fn slot(&mut self, stage: Stage) -> Option<&mut StageMark> {
        match stage {
            Stage::StartVideo => Some(&mut self.start_video),
            Stage::StopVideo => Some(&mut self.stop_video),
            Stage::StartEmotion => Some(&mut self.start_emotion),
            Stage::StopEmotion => Some(&mut self.stop_emotion),
            Stage::StartQuiz => Some(&mut self.start_quiz),
            Stage::StopQuiz => Some(&mut self.stop_quiz),
            Stage::EndStudy => None,
        }
    }

    /// Record the first occurrence of `stage`
    ///
    /// Returns true only when the flag moved from `NotOccurred` to `at`.
    /// A flag that is already set is left untouched.
    pub fn mark(&mut self, stage: Stage, at: DateTime<Utc>) -> bool {
        match self.slot(stage) {
            Some(mark) if !mark.is_set() => {
                *mark = StageMark::OccurredAt(at);
                true
            }
            _ => false,
        }
    }
}

/// In-memory state for one participant
#[derive(Debug)]
pub struct ParticipantRecord {
    id: Uuid,
    connection: Option<ConnectionHandle>,
    completed: bool,
    registered_at: DateTime<Utc>,
    stages: BTreeMap<String, StageFlags>,
}

impl ParticipantRecord {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            connection: None,
            completed: false,
            registered_at: time::now(),
            stages: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Flags for `video`, created all-unset on first sight
    pub fn stage_flags_mut(&mut self, video: &str) -> &mut StageFlags {
        self.stages.entry(video.to_string()).or_default()
    }

    /// Forward a message to the participant's live connection, if any
    pub fn relay(&self, message: ServerMessage) -> RelayStatus {
        match &self.connection {
            None => RelayStatus::NoConnection,
            Some(handle) if handle.send(message) => RelayStatus::Delivered,
            Some(_) => RelayStatus::Closed,
        }
    }

    /// Copy of the record without the connection handle
    pub fn snapshot(&self) -> ParticipantSnapshot {
        ParticipantSnapshot {
            id: self.id,
            completed: self.completed,
            registered_at: self.registered_at,
            stages: self.stages.clone(),
        }
    }
}

/// Serializable view of a participant record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSnapshot {
    pub id: Uuid,
    pub completed: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub registered_at: DateTime<Utc>,
    pub stages: BTreeMap<String, StageFlags>,
}

/// Process-wide participant table, scoped to one server instance
pub struct ParticipantRegistry {
    identifier: Identifier,
    participants: RwLock<HashMap<Uuid, ParticipantRecord>>,
    next_serial: AtomicU64,
}

impl ParticipantRegistry {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            participants: RwLock::new(HashMap::new()),
            next_serial: AtomicU64::new(1),
        }
    }

    /// Create the outbound queue for a new participant socket
    pub fn open_connection(&self) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        (ConnectionHandle { serial, tx }, rx)
    }

    /// Register `name` and bind `connection` to its record
    ///
    /// Creates the record on first contact. The connection always replaces
    /// whatever was bound before: the most recent tab wins. The identifier
    /// is queued on the new connection as a `uuid` message.
    pub async fn register(&self, name: &str, connection: ConnectionHandle) -> Uuid {
        let id = self.identifier.derive(name);
        let mut participants = self.participants.write().await;

        let record = participants.entry(id).or_insert_with(|| {
            info!(participant = %id, "New participant registered");
            ParticipantRecord::new(id)
        });

        if !connection.send(ServerMessage::Uuid(id)) {
            debug!(participant = %id, serial = connection.serial(), "Socket closed before uuid reply");
        }
        if let Some(previous) = record.connection.replace(connection) {
            debug!(
                participant = %id,
                previous = previous.serial(),
                "Replacing participant connection"
            );
        }

        id
    }

    /// Unbind a connection that has closed
    ///
    /// No-op when a newer connection has been bound since.
    pub async fn release(&self, id: Uuid, serial: u64) {
        let mut participants = self.participants.write().await;
        if let Some(record) = participants.get_mut(&id) {
            if record.connection.as_ref().map(ConnectionHandle::serial) == Some(serial) {
                record.connection = None;
                debug!(participant = %id, serial, "Participant connection released");
            }
        }
    }

    pub async fn lookup(&self, id: Uuid) -> Option<ParticipantSnapshot> {
        self.participants.read().await.get(&id).map(ParticipantRecord::snapshot)
    }

    pub async fn exists(&self, id: Uuid) -> bool {
        self.participants.read().await.contains_key(&id)
    }

    /// Identifier for `name`, disclosed only if that name has registered
    pub async fn lookup_name(&self, name: &str) -> Option<Uuid> {
        let id = self.identifier.derive(name);
        self.exists(id).await.then_some(id)
    }

    pub async fn is_connected(&self, id: Uuid) -> bool {
        self.participants
            .read()
            .await
            .get(&id)
            .map(ParticipantRecord::is_connected)
            .unwrap_or(false)
    }

    pub async fn len(&self) -> usize {
        self.participants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.participants.read().await.is_empty()
    }

    /// Run `f` on a record while holding the registry write lock
    ///
    /// Everything `f` does is atomic with respect to other notifications.
    pub async fn with_record_mut<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ParticipantRecord) -> R,
    ) -> Option<R> {
        let mut participants = self.participants.write().await;
        participants.get_mut(&id).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ParticipantRegistry {
        ParticipantRegistry::new(Identifier::new(Uuid::NAMESPACE_OID))
    }

    #[test]
    fn test_stage_flag_marks_once() {
        let mut flags = StageFlags::default();
        let first = time::now();
        let later = first + chrono::Duration::seconds(5);

        assert!(flags.mark(Stage::StartQuiz, first));
        assert!(!flags.mark(Stage::StartQuiz, later));
        assert_eq!(flags.get(Stage::StartQuiz), Some(StageMark::OccurredAt(first)));
        assert_eq!(flags.get(Stage::StopQuiz), Some(StageMark::NotOccurred));
    }

    #[test]
    fn test_terminal_stage_has_no_flag() {
        let mut flags = StageFlags::default();
        assert!(!flags.mark(Stage::EndStudy, time::now()));
        assert_eq!(flags.get(Stage::EndStudy), None);
        assert_eq!(flags, StageFlags::default());
    }

    #[tokio::test]
    async fn test_register_creates_record_once() {
        let registry = registry();
        let (first, _rx1) = registry.open_connection();
        let (second, _rx2) = registry.open_connection();

        let id1 = registry.register("Jane Doe", first).await;
        let before = registry.lookup(id1).await.unwrap();
        let id2 = registry.register("JANE DOE", second).await;

        assert_eq!(id1, id2);
        assert_eq!(registry.len().await, 1);
        let after = registry.lookup(id1).await.unwrap();
        assert_eq!(before.registered_at, after.registered_at);
        assert!(!after.completed);
        assert!(after.stages.is_empty());
    }

    #[tokio::test]
    async fn test_register_replies_with_uuid() {
        let registry = registry();
        let (handle, mut rx) = registry.open_connection();

        let id = registry.register("Jane Doe", handle).await;

        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Uuid(id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reregistration_rebinds_connection() {
        let registry = registry();
        let (first, mut rx1) = registry.open_connection();
        let (second, mut rx2) = registry.open_connection();

        let id = registry.register("jane", first).await;
        registry.register("jane", second).await;
        assert_eq!(rx1.try_recv().unwrap(), ServerMessage::Uuid(id));
        assert_eq!(rx2.try_recv().unwrap(), ServerMessage::Uuid(id));

        let status = registry
            .with_record_mut(id, |r| r.relay(ServerMessage::relay(Stage::StartVideo, "v1")))
            .await
            .unwrap();
        assert_eq!(status, RelayStatus::Delivered);
        assert!(rx1.try_recv().is_err());
        assert_eq!(
            rx2.try_recv().unwrap(),
            ServerMessage::StartVideo("v1".to_string())
        );
    }

    #[tokio::test]
    async fn test_release_ignores_stale_serial() {
        let registry = registry();
        let (first, _rx1) = registry.open_connection();
        let (second, _rx2) = registry.open_connection();
        let stale = first.serial();

        let id = registry.register("jane", first).await;
        registry.register("jane", second.clone()).await;

        registry.release(id, stale).await;
        assert!(registry.is_connected(id).await);

        registry.release(id, second.serial()).await;
        assert!(!registry.is_connected(id).await);
    }

    #[tokio::test]
    async fn test_relay_without_connection_is_dropped() {
        let registry = registry();
        let (handle, _rx) = registry.open_connection();
        let serial = handle.serial();
        let id = registry.register("jane", handle).await;
        registry.release(id, serial).await;

        let status = registry
            .with_record_mut(id, |r| r.relay(ServerMessage::relay(Stage::StopVideo, "v1")))
            .await;
        assert_eq!(status, Some(RelayStatus::NoConnection));
    }

    #[tokio::test]
    async fn test_relay_to_closed_socket_reports_closed() {
        let registry = registry();
        let (handle, rx) = registry.open_connection();
        let id = registry.register("jane", handle).await;
        drop(rx);

        let status = registry
            .with_record_mut(id, |r| r.relay(ServerMessage::relay(Stage::StopVideo, "v1")))
            .await;
        assert_eq!(status, Some(RelayStatus::Closed));
    }

    #[tokio::test]
    async fn test_lookup_name_hides_unregistered_names() {
        let registry = registry();
        assert_eq!(registry.lookup_name("nobody").await, None);
        assert!(registry.is_empty().await);

        let (handle, _rx) = registry.open_connection();
        let id = registry.register("Somebody", handle).await;
        assert_eq!(registry.lookup_name("somebody").await, Some(id));
        assert!(registry.exists(id).await);
        assert!(!registry.exists(Uuid::nil()).await);
    }

    #[tokio::test]
    async fn test_connection_serials_are_unique() {
        let registry = registry();
        let (a, _ra) = registry.open_connection();
        let (b, _rb) = registry.open_connection();
        assert_ne!(a.serial(), b.serial());
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let mut record = ParticipantRecord::new(Uuid::NAMESPACE_OID);
        let at = time::from_epoch_millis(1_700_000_000_000).unwrap();
        record.stage_flags_mut("v1").mark(Stage::StartVideo, at);

        let value = serde_json::to_value(record.snapshot()).unwrap();
        assert_eq!(value["id"], Uuid::NAMESPACE_OID.to_string());
        assert_eq!(value["completed"], false);
        assert!(value["registeredAt"].is_i64());
        assert_eq!(value["stages"]["v1"]["start_video"], 1_700_000_000_000i64);
        assert_eq!(value["stages"]["v1"]["stop_quiz"], false);
        assert!(value.get("connection").is_none());
    }
}
