//! # StudyLink Common Library
//!
//! Shared code for the StudyLink coordination server and its tooling:
//! - Error type and `Result` alias
//! - Configuration loading (TOML file + compiled defaults)
//! - Participant identifier derivation
//! - Stage names and real-time wire messages
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod identifier;
pub mod time;

pub use error::{Error, Result};
pub use events::{ClientMessage, ServerMessage, Stage, StageMark};
pub use identifier::Identifier;
