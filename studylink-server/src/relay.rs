//! Stage notification deduplication and relay
//!
//! The survey platform delivers every notification several times. Only the
//! first delivery of a (participant, video, stage) triple has effects:
//! the stage flag is stamped, the event is relayed to the participant's
//! socket and to the monitor feed, and a fresh snapshot is persisted.
//! Later copies are acknowledged and otherwise ignored.
//!
//! Once a participant reaches `end_study` the record is completed and every
//! further notification for it is ignored, including ones naming videos
//! never seen before.

use std::sync::Arc;

use serde::Deserialize;
use studylink_common::{identifier, time, ServerMessage, Stage};
use tracing::{debug, info, warn};

use crate::monitor::{MonitorBroadcaster, StageEvent};
use crate::persistence::PersistenceGateway;
use crate::registry::{ParticipantRegistry, RelayStatus};

/// Notification body posted by the survey platform
///
/// Every field is optional on the wire; missing or malformed values are
/// acknowledged without effect.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StageNotification {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub video_name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

impl StageNotification {
    pub fn new(location: &str, video_name: &str, uuid: &str) -> Self {
        Self {
            location: Some(location.to_string()),
            video_name: Some(video_name.to_string()),
            uuid: Some(uuid.to_string()),
        }
    }
}

/// What a notification did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// First occurrence of a per-video stage
    Recorded { relay: RelayStatus },
    /// First `end_study`; the participant is now completed
    Completed { relay: RelayStatus },
    /// Stage already recorded for this video
    Duplicate,
    /// Participant finished; nothing more is recorded
    AlreadyCompleted,
    /// Missing, malformed or unregistered identifier
    UnknownParticipant,
    /// Missing or unrecognized location
    UnknownStage,
    /// Per-video stage without a video name
    MissingVideo,
}

impl NotificationOutcome {
    /// Whether the notification changed participant state
    pub fn has_effect(&self) -> bool {
        matches!(
            self,
            NotificationOutcome::Recorded { .. } | NotificationOutcome::Completed { .. }
        )
    }
}

/// Applies stage notifications to the registry
pub struct Coordinator {
    registry: Arc<ParticipantRegistry>,
    persistence: PersistenceGateway,
    monitor: MonitorBroadcaster,
}

impl Coordinator {
    pub fn new(
        registry: Arc<ParticipantRegistry>,
        persistence: PersistenceGateway,
        monitor: MonitorBroadcaster,
    ) -> Self {
        Self {
            registry,
            persistence,
            monitor,
        }
    }

    /// Apply one notification
    ///
    /// The check-and-set, relay, monitor publish and persistence enqueue all
    /// happen under the registry write lock, so concurrent duplicates cannot
    /// both pass the check.
    pub async fn handle_notification(&self, notification: &StageNotification) -> NotificationOutcome {
        let id = match notification
            .uuid
            .as_deref()
            .and_then(|s| identifier::parse(s).ok())
        {
            Some(id) => id,
            None => {
                debug!(uuid = ?notification.uuid, "Notification without a valid identifier");
                return NotificationOutcome::UnknownParticipant;
            }
        };

        let stage = notification
            .location
            .as_deref()
            .and_then(|location| location.parse::<Stage>().ok());
        let video = notification.video_name.as_deref().unwrap_or_default();

        let outcome = self
            .registry
            .with_record_mut(id, |record| {
                if record.is_completed() {
                    return NotificationOutcome::AlreadyCompleted;
                }

                let stage = match stage {
                    Some(stage) => stage,
                    None => return NotificationOutcome::UnknownStage,
                };

                let now = time::now();
                if stage.is_terminal() {
                    record.mark_completed();
                } else {
                    if video.is_empty() {
                        return NotificationOutcome::MissingVideo;
                    }
                    if !record.stage_flags_mut(video).mark(stage, now) {
                        return NotificationOutcome::Duplicate;
                    }
                }

                let relay = record.relay(ServerMessage::relay(stage, video));
                self.monitor.publish(StageEvent {
                    participant: id,
                    video: video.to_string(),
                    stage,
                    timestamp: now,
                });
                self.persistence.persist(&record.snapshot());

                if stage.is_terminal() {
                    NotificationOutcome::Completed { relay }
                } else {
                    NotificationOutcome::Recorded { relay }
                }
            })
            .await
            .unwrap_or(NotificationOutcome::UnknownParticipant);

        match outcome {
            NotificationOutcome::Recorded { relay } | NotificationOutcome::Completed { relay } => {
                info!(
                    participant = %id,
                    video,
                    stage = ?stage,
                    relay = ?relay,
                    "Stage recorded"
                );
            }
            NotificationOutcome::UnknownStage => {
                warn!(participant = %id, location = ?notification.location, "Unknown stage location");
            }
            NotificationOutcome::MissingVideo => {
                warn!(participant = %id, stage = ?stage, "Stage notification without video name");
            }
            other => {
                debug!(participant = %id, video, stage = ?stage, outcome = ?other, "Notification ignored");
            }
        }

        outcome
    }
}
