//! Stage names and real-time wire messages
//!
//! The survey platform reports progress with a `location` string. Six of
//! those locations are per-video stages; `end_study` closes the session.
//! Messages on the participant socket use a socket.io-style envelope:
//! `{"event": <name>, "data": <payload>}`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::time::{from_epoch_millis, to_epoch_millis};
use crate::Error;

/// Lifecycle stage reported by the survey platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    StartVideo,
    StopVideo,
    StartEmotion,
    StopEmotion,
    StartQuiz,
    StopQuiz,
    /// Terminal stage, not tracked per video
    EndStudy,
}

impl Stage {
    /// The six stages tracked per video, in study order
    pub const PER_VIDEO: [Stage; 6] = [
        Stage::StartVideo,
        Stage::StopVideo,
        Stage::StartEmotion,
        Stage::StopEmotion,
        Stage::StartQuiz,
        Stage::StopQuiz,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::StartVideo => "start_video",
            Stage::StopVideo => "stop_video",
            Stage::StartEmotion => "start_emotion",
            Stage::StopEmotion => "stop_emotion",
            Stage::StartQuiz => "start_quiz",
            Stage::StopQuiz => "stop_quiz",
            Stage::EndStudy => "end_study",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::EndStudy)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_video" => Ok(Stage::StartVideo),
            "stop_video" => Ok(Stage::StopVideo),
            "start_emotion" => Ok(Stage::StartEmotion),
            "stop_emotion" => Ok(Stage::StopEmotion),
            "start_quiz" => Ok(Stage::StartQuiz),
            "stop_quiz" => Ok(Stage::StopQuiz),
            "end_study" => Ok(Stage::EndStudy),
            other => Err(Error::InvalidInput(format!("unknown stage '{}'", other))),
        }
    }
}

/// Whether a stage has happened, and when
///
/// Persisted as `false` or epoch milliseconds so snapshot files keep the
/// shape the analysis scripts already read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageMark {
    #[default]
    NotOccurred,
    OccurredAt(DateTime<Utc>),
}

impl StageMark {
    pub fn is_set(&self) -> bool {
        matches!(self, StageMark::OccurredAt(_))
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            StageMark::NotOccurred => None,
            StageMark::OccurredAt(ts) => Some(*ts),
        }
    }
}

impl Serialize for StageMark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StageMark::NotOccurred => serializer.serialize_bool(false),
            StageMark::OccurredAt(ts) => serializer.serialize_i64(to_epoch_millis(ts)),
        }
    }
}

impl<'de> Deserialize<'de> for StageMark {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Millis(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(false) => Ok(StageMark::NotOccurred),
            Raw::Flag(true) => Err(serde::de::Error::custom(
                "stage mark must be false or a timestamp",
            )),
            Raw::Millis(ms) => from_epoch_millis(ms)
                .map(StageMark::OccurredAt)
                .ok_or_else(|| serde::de::Error::custom("stage timestamp out of range")),
        }
    }
}

/// Message sent by the participant's browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    RegisterUser { name: String },
}

/// Message sent to the participant's browser
///
/// Stage relays carry the video name as payload; the event name is the stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Uuid(Uuid),
    StartVideo(String),
    StopVideo(String),
    StartEmotion(String),
    StopEmotion(String),
    StartQuiz(String),
    StopQuiz(String),
    EndStudy(String),
}

impl ServerMessage {
    pub fn relay(stage: Stage, video: &str) -> Self {
        let video = video.to_string();
        match stage {
            Stage::StartVideo => ServerMessage::StartVideo(video),
            Stage::StopVideo => ServerMessage::StopVideo(video),
            Stage::StartEmotion => ServerMessage::StartEmotion(video),
            Stage::StopEmotion => ServerMessage::StopEmotion(video),
            Stage::StartQuiz => ServerMessage::StartQuiz(video),
            Stage::StopQuiz => ServerMessage::StopQuiz(video),
            Stage::EndStudy => ServerMessage::EndStudy(video),
        }
    }
}
