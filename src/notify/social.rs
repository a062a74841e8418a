//! Social notification store & dispatcher.
//!
//! Domain collaborators (post/comment handlers) call [`create`] when a user
//! acts on someone else's content. The record is persisted first; the live
//! push to the recipient's room happens only if a channel is registered and
//! is never retried or rolled back on failure.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::error::GatewayError;
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;

/// Default page size for notification listing.
const DEFAULT_LIMIT: u32 = 20;
/// Maximum page size for notification listing.
const MAX_LIMIT: u32 = 100;

/// What happened, as a closed union — each variant carries exactly the
/// fields that notification type needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SocialEvent {
    Like { post_id: String },
    Comment { post_id: String, preview: String },
    Reply { post_id: String, preview: String },
}

impl SocialEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SocialEvent::Like { .. } => "like",
            SocialEvent::Comment { .. } => "comment",
            SocialEvent::Reply { .. } => "reply",
        }
    }

    fn post_id(&self) -> &str {
        match self {
            SocialEvent::Like { post_id }
            | SocialEvent::Comment { post_id, .. }
            | SocialEvent::Reply { post_id, .. } => post_id,
        }
    }

    fn preview(&self) -> Option<&str> {
        match self {
            SocialEvent::Like { .. } => None,
            SocialEvent::Comment { preview, .. } | SocialEvent::Reply { preview, .. } => {
                Some(preview)
            }
        }
    }
}

/// A persisted social notification, populated with the sender's display
/// name for rendering.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub recipient_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub kind: String,
    pub post_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub read: bool,
    pub created_at: String,
}

/// Create a notification for `recipient_id` about `sender_id`'s action.
/// Returns `None` without writing anything when the two are the same
/// identity — self-action is not notified.
pub async fn create(
    state: &AppState,
    recipient_id: &str,
    sender_id: &str,
    event: SocialEvent,
) -> Result<Option<NotificationRecord>, GatewayError> {
    if recipient_id == sender_id {
        return Ok(None);
    }

    let db = state.db.clone();
    let recipient = recipient_id.to_string();
    let sender = sender_id.to_string();

    let record = tokio::task::spawn_blocking(move || -> Result<NotificationRecord, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let sender_name: String = conn
            .query_row(
                "SELECT display_name FROM users WHERE id = ?1",
                [&sender],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or_else(|| "Unknown".to_string());

        let id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO notifications (id, recipient_id, sender_id, kind, post_id, preview)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id,
                recipient,
                sender,
                event.kind(),
                event.post_id(),
                event.preview(),
            ],
        )?;
        let created_at: String = conn.query_row(
            "SELECT created_at FROM notifications WHERE id = ?1",
            [&id],
            |row| row.get(0),
        )?;

        Ok(NotificationRecord {
            id,
            recipient_id: recipient,
            sender_id: sender,
            sender_name,
            kind: event.kind().to_string(),
            post_id: event.post_id().to_string(),
            preview: event.preview().map(str::to_string),
            read: false,
            created_at,
        })
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    // Live push only when the recipient has a registered channel. The
    // durable record above is the source of truth either way.
    if state.registry.is_live(&record.recipient_id) {
        state.registry.send_to_identity(
            &record.recipient_id,
            &ServerEvent::NewNotification(record.clone()),
        );
    } else {
        tracing::debug!(
            recipient = %record.recipient_id,
            notification = %record.id,
            "Recipient offline, notification stored for later fetch"
        );
    }

    Ok(Some(record))
}

/// Flip every unread notification for the recipient. Read state only moves
/// false → true. Returns the number flipped.
pub async fn mark_all_read(state: &AppState, recipient_id: &str) -> Result<usize, GatewayError> {
    let db = state.db.clone();
    let recipient = recipient_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;
        let updated = conn.execute(
            "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
            [&recipient],
        )?;
        Ok(updated)
    })
    .await
    .map_err(|_| GatewayError::Join)?
}

/// Flip one notification, scoped by the recipient filter so an identity
/// can never touch someone else's record.
pub async fn mark_one_read(
    state: &AppState,
    recipient_id: &str,
    notification_id: &str,
) -> Result<(), GatewayError> {
    let db = state.db.clone();
    let recipient = recipient_id.to_string();
    let id = notification_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;
        let updated = conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient_id = ?2",
            rusqlite::params![id, recipient],
        )?;
        if updated == 0 {
            return Err(GatewayError::NotFound("notification"));
        }
        Ok(())
    })
    .await
    .map_err(|_| GatewayError::Join)?
}

// --- REST surface ---

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub before: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub notifications: Vec<NotificationRecord>,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct UpdatedResponse {
    pub updated: usize,
}

/// GET /api/notifications — the caller's notifications, newest first,
/// paginated by id (UUIDv7 ids order by creation time).
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, GatewayError> {
    let db = state.db.clone();
    let recipient = claims.sub.clone();
    let before = query.before.clone();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let response = tokio::task::spawn_blocking(move || -> Result<ListResponse, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let mut stmt = conn.prepare(
            "SELECT n.id, n.recipient_id, n.sender_id, n.kind, n.post_id, n.preview,
                    n.read, n.created_at, u.display_name
             FROM notifications n
             LEFT JOIN users u ON u.id = n.sender_id
             WHERE n.recipient_id = ?1 AND (?2 IS NULL OR n.id < ?2)
             ORDER BY n.id DESC
             LIMIT ?3",
        )?;

        let mut notifications: Vec<NotificationRecord> = stmt
            .query_map(
                rusqlite::params![recipient, before, i64::from(limit) + 1],
                |row| {
                    Ok(NotificationRecord {
                        id: row.get(0)?,
                        recipient_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        kind: row.get(3)?,
                        post_id: row.get(4)?,
                        preview: row.get(5)?,
                        read: row.get(6)?,
                        created_at: row.get(7)?,
                        sender_name: row
                            .get::<_, Option<String>>(8)?
                            .unwrap_or_else(|| "Unknown".to_string()),
                    })
                },
            )?
            .collect::<Result<_, _>>()?;

        let has_more = notifications.len() > limit as usize;
        notifications.truncate(limit as usize);

        Ok(ListResponse {
            notifications,
            has_more,
        })
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(response))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<CountResponse>, GatewayError> {
    let db = state.db.clone();
    let recipient = claims.sub.clone();

    let count = tokio::task::spawn_blocking(move || -> Result<i64, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND read = 0",
            [&recipient],
            |row| row.get(0),
        )?;
        Ok(count)
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(CountResponse { count }))
}

/// PUT /api/notifications/read-all
pub async fn read_all(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UpdatedResponse>, GatewayError> {
    let updated = mark_all_read(&state, &claims.sub).await?;
    Ok(Json(UpdatedResponse { updated }))
}

/// PUT /api/notifications/{id}/read
pub async fn read_one(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<UpdatedResponse>, GatewayError> {
    mark_one_read(&state, &claims.sub, &id).await?;
    Ok(Json(UpdatedResponse { updated: 1 }))
}

/// DELETE /api/notifications/{id} — recipient-scoped delete.
pub async fn delete_one(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<UpdatedResponse>, GatewayError> {
    let db = state.db.clone();
    let recipient = claims.sub.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;
        let deleted = conn.execute(
            "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
            rusqlite::params![id, recipient],
        )?;
        if deleted == 0 {
            return Err(GatewayError::NotFound("notification"));
        }
        Ok(())
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(UpdatedResponse { updated: 1 }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_store_constraint() {
        let like = SocialEvent::Like {
            post_id: "p1".into(),
        };
        let comment = SocialEvent::Comment {
            post_id: "p1".into(),
            preview: "hi".into(),
        };
        let reply = SocialEvent::Reply {
            post_id: "p1".into(),
            preview: "hi".into(),
        };
        assert_eq!(like.kind(), "like");
        assert_eq!(comment.kind(), "comment");
        assert_eq!(reply.kind(), "reply");
        assert!(like.preview().is_none());
        assert_eq!(reply.preview(), Some("hi"));
    }
}
