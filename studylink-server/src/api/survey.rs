//! Endpoints called by the survey platform

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::extract::FormOrJson;
use crate::relay::StageNotification;
use crate::AppState;

/// Body of every `/qualtrics` response
pub const ACK: &str = "done";

/// Returned by `/get_uuid` for names that never registered
pub const LOOKUP_FAILED: &str = "failed";

/// POST /qualtrics
///
/// Applies a stage notification. The survey only continues once it sees
/// the acknowledgment, so the answer is the same whether or not the
/// notification had any effect, and even when the body cannot be read.
pub async fn notify_stage(
    State(state): State<AppState>,
    payload: Option<FormOrJson<StageNotification>>,
) -> &'static str {
    match payload {
        Some(FormOrJson(notification)) => {
            state.coordinator.handle_notification(&notification).await;
        }
        None => warn!("Unreadable stage notification body"),
    }
    ACK
}

#[derive(Debug, Deserialize)]
pub struct UuidRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct UuidResponse {
    pub uuid: String,
}

/// POST /get_uuid
///
/// Looks up the identifier for a display name. Identifiers are only
/// disclosed for names that have registered from a browser; any other
/// request, including an unreadable body, gets the `failed` sentinel.
pub async fn get_uuid(
    State(state): State<AppState>,
    payload: Option<FormOrJson<UuidRequest>>,
) -> Json<UuidResponse> {
    let found = match payload {
        Some(FormOrJson(request)) => state.registry.lookup_name(&request.name).await,
        None => {
            warn!("Unreadable identifier lookup body");
            None
        }
    };
    let uuid = match found {
        Some(id) => id.to_string(),
        None => {
            debug!("Identifier lookup for unregistered name");
            LOOKUP_FAILED.to_string()
        }
    };
    Json(UuidResponse { uuid })
}
