//! WebSocket channel handling.
//!
//! One channel per (user, device), carrying JSON envelopes
//! `{ type, data, timestamp }`. Consumed types: `register_device`,
//! `start_editing`, `stop_editing`, `note_updated`, `conflict_detected`,
//! `ping`. Produced: `connection_established`, `pong`, plus the broadcast
//! types fanned out by the presence registry.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use quill_core::models::NoteId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::auth::AuthenticatedDevice;
use crate::presence::PresenceRegistry;
use crate::routes::AppState;

/// Wire envelope carried in both directions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: i64,
}

impl Envelope {
    #[must_use]
    pub fn new(kind: &str, data: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn into_message(self) -> Message {
        // Serializing a string/Value envelope cannot fail
        let text = serde_json::to_string(&self).unwrap_or_default();
        Message::Text(text.into())
    }
}

/// Query parameters for the WebSocket upgrade
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// WebSocket upgrade handler; the token authenticates the (user, device)
/// pair and an invalid one refuses the connection
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = match state.verifier.verify_access_token(&query.token) {
        Ok(identity) => identity,
        Err(error) => {
            tracing::warn!(%error, "WebSocket connection rejected");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| handle_socket(socket, registry, identity))
        .into_response()
}

/// Drive an established channel until it closes
async fn handle_socket(
    socket: WebSocket,
    registry: Arc<PresenceRegistry>,
    identity: AuthenticatedDevice,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    if let Err(error) = registry
        .register(&identity.user_id, &identity.device_id, tx.clone())
        .await
    {
        tracing::error!(%error, "Failed to register channel");
        return;
    }

    let _ = tx.send(
        Envelope::new(
            "connection_established",
            serde_json::json!({
                "user_id": identity.user_id,
                "device_id": identity.device_id,
            }),
        )
        .into_message(),
    );

    tracing::info!(
        user = %identity.user_id,
        device = %identity.device_id,
        "WebSocket connected"
    );

    loop {
        tokio::select! {
            // Messages from this device
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(error) =
                            handle_text(&registry, &identity, &tx, text.as_str()).await
                        {
                            tracing::warn!(%error, "Failed to handle message");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = registry.touch(&identity.device_id).await;
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        let _ = registry.touch(&identity.device_id).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(error)) => {
                        tracing::warn!(%error, "WebSocket error");
                        break;
                    }
                }
            }

            // Broadcasts and replies routed to this device
            outgoing = rx.recv() => {
                match outgoing {
                    Some(message) => {
                        let closing = matches!(message, Message::Close(_));
                        if ws_tx.send(message).await.is_err() || closing {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!(
        user = %identity.user_id,
        device = %identity.device_id,
        "WebSocket disconnected"
    );
    if let Err(error) = registry.unregister(&identity.device_id).await {
        tracing::warn!(%error, "Failed to unregister channel");
    }
}

async fn handle_text(
    registry: &PresenceRegistry,
    identity: &AuthenticatedDevice,
    tx: &mpsc::UnboundedSender<Message>,
    text: &str,
) -> quill_core::Result<()> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::debug!(%error, "Ignoring malformed envelope");
            return Ok(());
        }
    };

    registry.touch(&identity.device_id).await?;

    match envelope.kind.as_str() {
        "register_device" => {
            let _ = tx.send(
                Envelope::new(
                    "connection_established",
                    serde_json::json!({
                        "user_id": identity.user_id,
                        "device_id": identity.device_id,
                    }),
                )
                .into_message(),
            );
        }
        "start_editing" => {
            if let Some(note_id) = parse_note_id(&envelope.data) {
                registry
                    .start_editing(note_id, &identity.user_id, &identity.device_id)
                    .await?;
            }
        }
        "stop_editing" => {
            if let Some(note_id) = parse_note_id(&envelope.data) {
                registry.stop_editing(note_id, &identity.user_id).await?;
            }
        }
        "note_updated" => {
            if let Some(note_id) = parse_note_id(&envelope.data) {
                registry
                    .note_updated(note_id, envelope.data, &identity.user_id)
                    .await?;
            }
        }
        "conflict_detected" => {
            if let Some(note_id) = parse_note_id(&envelope.data) {
                registry
                    .conflict_detected(note_id, envelope.data, Some(&identity.device_id))
                    .await?;
            }
        }
        "ping" => {
            let _ = tx.send(Envelope::new("pong", serde_json::Value::Null).into_message());
        }
        other => {
            tracing::debug!(kind = other, "Ignoring unknown envelope type");
        }
    }
    Ok(())
}

fn parse_note_id(data: &serde_json::Value) -> Option<NoteId> {
    data.get("note_id")?.as_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = Envelope::new("ping", serde_json::json!({ "note_id": "abc" }));
        let text = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.kind, "ping");
        assert_eq!(parsed.data["note_id"], "abc");
        assert!(parsed.timestamp > 0);
    }

    #[test]
    fn test_envelope_data_defaults_to_null() {
        let parsed: Envelope =
            serde_json::from_str(r#"{"type":"ping","timestamp":1}"#).unwrap();
        assert_eq!(parsed.kind, "ping");
        assert!(parsed.data.is_null());
    }

    #[test]
    fn test_parse_note_id() {
        let id = NoteId::new();
        let data = serde_json::json!({ "note_id": id.as_str() });
        assert_eq!(parse_note_id(&data), Some(id));
        assert_eq!(parse_note_id(&serde_json::json!({})), None);
        assert_eq!(parse_note_id(&serde_json::json!({ "note_id": "nope" })), None);
    }
}
