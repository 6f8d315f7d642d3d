//! HTTP and WebSocket handlers for studylink-server

pub mod auth;
pub mod extract;
pub mod health;
pub mod https;
pub mod sse;
pub mod survey;
pub mod ws;

pub use auth::require_basic_auth;
pub use health::health_routes;
pub use https::redirect_to_https;
pub use sse::monitor_events;
pub use survey::{get_uuid, notify_stage};
pub use ws::ws_handler;
