//! Wire protocol: typed socket events over JSON text frames.
//!
//! Every frame is `{"event": "...", "data": ...}` with camelCase payload
//! fields. Inbound frames decode into [`ClientEvent`] and dispatch to the
//! messaging engine; anything the gateway pushes is a [`ServerEvent`].
//! A handler failure is reported to the offending connection only, as an
//! `error` event — never by closing the socket.

use serde::{Deserialize, Serialize};

use crate::chat::engine::{self, Attachment, MessageRecord};
use crate::chat::groups::GroupRecord;
use crate::notify::admin::AdminNotificationRecord;
use crate::notify::social::NotificationRecord;
use crate::presence::{ConnectionSender, Identity};
use crate::state::AppState;

/// Events a client may send. Unknown event names or malformed payloads
/// yield an `error` event, not a close.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    EditMessage(EditMessagePayload),
    DeleteMessage(DeleteMessagePayload),
    ClearChat(ClearChatPayload),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub receiver_id: String,
    pub content: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    pub message_id: String,
    pub content: String,
    pub receiver_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagePayload {
    pub message_id: String,
    pub receiver_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearChatPayload {
    pub receiver_id: String,
}

/// Events the gateway pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "receive_message")]
    ReceiveMessage(MessageRecord),
    #[serde(rename = "message_sent")]
    MessageSent(MessageRecord),
    #[serde(rename = "message_edited", rename_all = "camelCase")]
    MessageEdited { message_id: String, content: String },
    #[serde(rename = "message_deleted", rename_all = "camelCase")]
    MessageDeleted { message_id: String },
    #[serde(rename = "chat_cleared", rename_all = "camelCase")]
    ChatCleared { sender_id: String },
    #[serde(rename = "presenceUpdate", rename_all = "camelCase")]
    PresenceUpdate {
        user_id: String,
        is_online: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen: Option<String>,
    },
    #[serde(rename = "onlineUsers")]
    OnlineUsers(Vec<String>),
    #[serde(rename = "new_notification")]
    NewNotification(NotificationRecord),
    #[serde(rename = "admin_notification")]
    AdminNotification(AdminNotificationRecord),
    #[serde(rename = "messages_read", rename_all = "camelCase")]
    MessagesRead {
        conversation_id: String,
        reader_id: String,
    },
    #[serde(rename = "group_created")]
    GroupCreated(GroupRecord),
    #[serde(rename = "group_update")]
    GroupUpdate(GroupRecord),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Handle one inbound text frame: decode, dispatch, report failure to the
/// initiating connection only. The actor awaits this before reading the
/// connection's next frame, so a connection's events are handled in input
/// order.
pub async fn handle_text_frame(
    text: &str,
    tx: &ConnectionSender,
    state: &AppState,
    identity: &Identity,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(
                identity = %identity.id,
                error = %e,
                "Failed to decode client frame"
            );
            send_event(
                tx,
                &ServerEvent::Error {
                    message: "unrecognized event".to_string(),
                },
            );
            return;
        }
    };

    match event {
        ClientEvent::SendMessage(payload) => {
            match engine::send_message(
                state,
                &identity.id,
                &payload.receiver_id,
                payload.content,
                payload.attachment,
            )
            .await
            {
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        identity = %identity.id,
                        error = %e,
                        "send_message failed"
                    );
                    send_event(
                        tx,
                        &ServerEvent::Error {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }
        // Edit/delete/clear arrive here as relay signals only; the durable
        // mutation travels over REST where ownership is enforced.
        ClientEvent::EditMessage(payload) => {
            state.registry.send_to_identity(
                &payload.receiver_id,
                &ServerEvent::MessageEdited {
                    message_id: payload.message_id,
                    content: payload.content,
                },
            );
        }
        ClientEvent::DeleteMessage(payload) => {
            state.registry.send_to_identity(
                &payload.receiver_id,
                &ServerEvent::MessageDeleted {
                    message_id: payload.message_id,
                },
            );
        }
        ClientEvent::ClearChat(payload) => {
            state.registry.send_to_identity(
                &payload.receiver_id,
                &ServerEvent::ChatCleared {
                    sender_id: identity.id.clone(),
                },
            );
        }
    }
}

/// Encode and push a single event to one connection.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(axum::extract::ws::Message::Text(json.into()));
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_wire_names() {
        let frame = r#"{"event":"send_message","data":{"receiverId":"u2","content":"hello"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        match event {
            ClientEvent::SendMessage(p) => {
                assert_eq!(p.receiver_id, "u2");
                assert_eq!(p.content, "hello");
                assert!(p.attachment.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn server_event_uses_platform_names() {
        let event = ServerEvent::PresenceUpdate {
            user_id: "u1".into(),
            is_online: false,
            last_seen: Some("2026-01-01T00:00:00Z".into()),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["event"], "presenceUpdate");
        assert_eq!(json["data"]["userId"], "u1");
        assert_eq!(json["data"]["isOnline"], false);
    }

    #[test]
    fn unknown_event_fails_decode() {
        let frame = r#"{"event":"fly_away","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(frame).is_err());
    }
}
