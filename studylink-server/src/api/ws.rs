//! Participant real-time channel
//!
//! The participant's browser opens `/ws`, sends `register_user` with the
//! display name, and receives its identifier back as a `uuid` event. Stage
//! relays arrive on the same socket for as long as it is the participant's
//! most recent connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use studylink_common::ClientMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::ConnectionHandle;
use crate::AppState;

/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (handle, mut outbound) = state.registry.open_connection();
    let serial = handle.serial();
    debug!(serial, "Participant socket opened");

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize socket message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut registered = Vec::new();
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Some(id) = handle_client_text(&state, &handle, &text).await {
                    if !registered.contains(&id) {
                        registered.push(id);
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(serial, "Participant socket error: {}", e);
                break;
            }
        }
    }

    for id in registered {
        state.registry.release(id, serial).await;
    }
    writer.abort();
    debug!(serial, "Participant socket closed");
}

/// Apply one text frame from a participant socket
///
/// Returns the identifier the socket was registered under, if the frame
/// was a registration. The registry queues the `uuid` reply itself.
pub async fn handle_client_text(
    state: &AppState,
    handle: &ConnectionHandle,
    text: &str,
) -> Option<Uuid> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::RegisterUser { name }) => {
            if name.trim().is_empty() {
                warn!(serial = handle.serial(), "Registration with empty name ignored");
                return None;
            }
            let id = state.registry.register(&name, handle.clone()).await;
            info!(participant = %id, serial = handle.serial(), "Participant connected");
            Some(id)
        }
        Err(e) => {
            warn!(serial = handle.serial(), "Unreadable socket message: {}", e);
            None
        }
    }
}
