//! Chat messaging engine: durable writes first, best-effort relay second.
//!
//! Every operation persists through the store before any live delivery is
//! attempted, and a delivery that finds nobody home is a no-op — the
//! recipient catches up through the REST history on reconnect. Ownership
//! checks (only the sender edits or deletes, only participants read) abort
//! with no mutation.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;

/// Single optional attachment carried by a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

/// A persisted chat message as it travels over the wire and the REST API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub read: bool,
    pub edited: bool,
    pub created_at: String,
}

/// Row mapper shared by the engine and the history endpoint. Column order:
/// id, conversation_id, sender_id, receiver_id, content, attachment_url,
/// attachment_type, attachment_name, read, edited, created_at.
pub(crate) fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let attachment_url: Option<String> = row.get(5)?;
    let attachment = match attachment_url {
        Some(url) => Some(Attachment {
            url,
            kind: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            name: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        attachment,
        read: row.get(8)?,
        edited: row.get(9)?,
        created_at: row.get(10)?,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, content, \
     attachment_url, attachment_type, attachment_name, read, edited, created_at";

/// All identities belonging to a conversation: the normalized pair for
/// direct chats, the roster for groups.
pub(crate) fn participants(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Vec<String>, GatewayError> {
    let row: Option<(String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT kind, participant_a, participant_b FROM conversations WHERE id = ?1",
            [conversation_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((kind, a, b)) = row else {
        return Err(GatewayError::NotFound("conversation"));
    };

    if kind == "group" {
        let mut stmt =
            conn.prepare("SELECT user_id FROM conversation_members WHERE conversation_id = ?1")?;
        let members = stmt
            .query_map([conversation_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(members)
    } else {
        Ok([a, b].into_iter().flatten().collect())
    }
}

/// Send a direct message: persist it, find-or-create the conversation for
/// the unordered pair, bump the last-message pointer, then deliver
/// `receive_message` to the receiver's room and echo `message_sent` to the
/// sender's own room.
pub async fn send_message(
    state: &AppState,
    sender_id: &str,
    receiver_id: &str,
    content: String,
    attachment: Option<Attachment>,
) -> Result<MessageRecord, GatewayError> {
    let db = state.db.clone();
    let sender = sender_id.to_string();
    let receiver = receiver_id.to_string();

    let record = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let receiver_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            [&receiver],
            |row| row.get(0),
        )?;
        if !receiver_exists {
            return Err(GatewayError::NotFound("receiver"));
        }

        // Normalized participant order plus the UNIQUE(participant_a,
        // participant_b) constraint make find-or-create race-free: two
        // concurrent first messages resolve to the same row.
        let (a, b) = if sender < receiver {
            (sender.as_str(), receiver.as_str())
        } else {
            (receiver.as_str(), sender.as_str())
        };
        conn.execute(
            "INSERT OR IGNORE INTO conversations (id, kind, participant_a, participant_b)
             VALUES (?1, 'direct', ?2, ?3)",
            rusqlite::params![Uuid::now_v7().to_string(), a, b],
        )?;
        let conversation_id: String = conn.query_row(
            "SELECT id FROM conversations WHERE participant_a = ?1 AND participant_b = ?2",
            rusqlite::params![a, b],
            |row| row.get(0),
        )?;

        let message_id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content,
                                   attachment_url, attachment_type, attachment_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                message_id,
                conversation_id,
                sender,
                receiver,
                content,
                attachment.as_ref().map(|att| att.url.clone()),
                attachment.as_ref().map(|att| att.kind.clone()),
                attachment.as_ref().map(|att| att.name.clone()),
            ],
        )?;
        conn.execute(
            "UPDATE conversations SET last_message_id = ?1, updated_at = datetime('now')
             WHERE id = ?2",
            rusqlite::params![message_id, conversation_id],
        )?;

        let created_at: String = conn.query_row(
            "SELECT created_at FROM messages WHERE id = ?1",
            [&message_id],
            |row| row.get(0),
        )?;

        Ok(MessageRecord {
            id: message_id,
            conversation_id,
            sender_id: sender,
            receiver_id: Some(receiver),
            content,
            attachment,
            read: false,
            edited: false,
            created_at,
        })
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    // The write is committed; from here delivery is fire-and-forget.
    if let Some(receiver) = record.receiver_id.as_deref() {
        if state.registry.is_live(receiver) {
            state
                .registry
                .send_to_identity(receiver, &ServerEvent::ReceiveMessage(record.clone()));
        } else {
            tracing::debug!(
                receiver = %receiver,
                message_id = %record.id,
                "Receiver offline, message stored for later fetch"
            );
        }
    }
    state
        .registry
        .send_to_identity(&record.sender_id, &ServerEvent::MessageSent(record.clone()));

    Ok(record)
}

/// Edit a message body. Sender-only; relays the new body to every other
/// participant's room by message id.
pub async fn edit_message(
    state: &AppState,
    actor_id: &str,
    message_id: &str,
    content: String,
) -> Result<MessageRecord, GatewayError> {
    let db = state.db.clone();
    let actor = actor_id.to_string();
    let msg_id = message_id.to_string();
    let new_content = content.clone();

    let (record, others) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let sender: Option<String> = conn
            .query_row(
                "SELECT sender_id FROM messages WHERE id = ?1",
                [&msg_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(sender) = sender else {
            return Err(GatewayError::NotFound("message"));
        };
        if sender != actor {
            return Err(GatewayError::Unauthorized);
        }

        conn.execute(
            "UPDATE messages SET content = ?1, edited = 1 WHERE id = ?2",
            rusqlite::params![new_content, msg_id],
        )?;

        let record = conn.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            [&msg_id],
            message_from_row,
        )?;

        let mut others = participants(&conn, &record.conversation_id)?;
        others.retain(|id| id != &actor);
        Ok((record, others))
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    for other in &others {
        state.registry.send_to_identity(
            other,
            &ServerEvent::MessageEdited {
                message_id: record.id.clone(),
                content: content.clone(),
            },
        );
    }

    Ok(record)
}

/// Hard-delete a message. Sender-only; detaches the conversation's
/// last-message pointer if it referenced this message, then relays the
/// deletion by message id.
pub async fn delete_message(
    state: &AppState,
    actor_id: &str,
    message_id: &str,
) -> Result<(), GatewayError> {
    let db = state.db.clone();
    let actor = actor_id.to_string();
    let msg_id = message_id.to_string();

    let others = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT sender_id, conversation_id FROM messages WHERE id = ?1",
                [&msg_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((sender, conversation_id)) = row else {
            return Err(GatewayError::NotFound("message"));
        };
        if sender != actor {
            return Err(GatewayError::Unauthorized);
        }

        let mut others = participants(&conn, &conversation_id)?;
        others.retain(|id| id != &actor);

        conn.execute(
            "UPDATE conversations SET last_message_id = NULL
             WHERE id = ?1 AND last_message_id = ?2",
            rusqlite::params![conversation_id, msg_id],
        )?;
        conn.execute("DELETE FROM messages WHERE id = ?1", [&msg_id])?;

        Ok(others)
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    for other in &others {
        state.registry.send_to_identity(
            other,
            &ServerEvent::MessageDeleted {
                message_id: message_id.to_string(),
            },
        );
    }

    Ok(())
}

/// Soft-delete for one viewer: every message in the conversation gains a
/// hidden marker for that viewer; the counterpart's view is untouched.
/// Returns the number of newly hidden messages.
pub async fn clear_for_viewer(
    state: &AppState,
    conversation_id: &str,
    viewer_id: &str,
) -> Result<usize, GatewayError> {
    let db = state.db.clone();
    let conv_id = conversation_id.to_string();
    let viewer = viewer_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let members = participants(&conn, &conv_id)?;
        if !members.iter().any(|id| id == &viewer) {
            return Err(GatewayError::Unauthorized);
        }

        let hidden = conn.execute(
            "INSERT OR IGNORE INTO message_hidden (message_id, user_id)
             SELECT id, ?2 FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conv_id, viewer],
        )?;
        Ok(hidden)
    })
    .await
    .map_err(|_| GatewayError::Join)?
}

/// Mark every message in the conversation not sent by the reader as read by
/// the reader. Idempotent: already-marked messages are skipped, and a
/// reader is never recorded on their own messages. Broadcasts a
/// read-receipt to all participants' rooms.
pub async fn mark_read(
    state: &AppState,
    conversation_id: &str,
    reader_id: &str,
) -> Result<usize, GatewayError> {
    let db = state.db.clone();
    let conv_id = conversation_id.to_string();
    let reader = reader_id.to_string();

    let (newly_read, members) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let members = participants(&conn, &conv_id)?;
        if !members.iter().any(|id| id == &reader) {
            return Err(GatewayError::Unauthorized);
        }

        let newly_read = conn.execute(
            "INSERT OR IGNORE INTO message_reads (message_id, reader_id)
             SELECT id, ?2 FROM messages
             WHERE conversation_id = ?1 AND sender_id != ?2",
            rusqlite::params![conv_id, reader],
        )?;
        conn.execute(
            "UPDATE messages SET read = 1
             WHERE conversation_id = ?1 AND sender_id != ?2 AND read = 0",
            rusqlite::params![conv_id, reader],
        )?;

        Ok((newly_read, members))
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    let receipt = ServerEvent::MessagesRead {
        conversation_id: conversation_id.to_string(),
        reader_id: reader_id.to_string(),
    };
    for member in &members {
        state.registry.send_to_identity(member, &receipt);
    }

    Ok(newly_read)
}
