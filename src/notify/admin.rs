//! Operational notification store & dispatcher for the admin back office.
//!
//! Domain operations (signup, login, contact form, verification review,
//! blog publishing) call [`record`] as a side effect. Unlike the social
//! variant there is no "self" concept: every call persists, and the
//! broadcast to the shared admin room simply reaches nobody when no admin
//! is connected. Read state is global — any admin may mark or delete any
//! record.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::DbPool;
use crate::error::GatewayError;
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

/// The closed set of operational events, each carrying only the fields
/// that event needs. Stored as canonical JSON in the `detail` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AdminEvent {
    UserLogin {
        user_id: String,
        display_name: String,
    },
    UserSignup {
        user_id: String,
        display_name: String,
    },
    ContactRequest {
        first_name: String,
        last_name: String,
        email: String,
    },
    VerificationRequest {
        user_id: String,
        display_name: String,
    },
    VerificationUpdate {
        user_id: String,
        approved: bool,
    },
    NewPost {
        post_id: String,
        author_id: String,
        title: String,
    },
}

impl AdminEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AdminEvent::UserLogin { .. } => "user_login",
            AdminEvent::UserSignup { .. } => "user_signup",
            AdminEvent::ContactRequest { .. } => "contact_request",
            AdminEvent::VerificationRequest { .. } => "verification_request",
            AdminEvent::VerificationUpdate { .. } => "verification_update",
            AdminEvent::NewPost { .. } => "new_post",
        }
    }
}

/// A persisted operational notification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNotificationRecord {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub detail: AdminEvent,
    pub read: bool,
    pub created_at: String,
}

/// Persist an operational notification and broadcast it to the shared
/// admin room. Always persists; zero connected admins is a silent no-op
/// on the delivery side.
pub async fn record(
    state: &AppState,
    title: &str,
    message: &str,
    event: AdminEvent,
) -> Result<AdminNotificationRecord, GatewayError> {
    let db = state.db.clone();
    let title = title.to_string();
    let message = message.to_string();
    let detail_json = serde_json::to_string(&event)?;
    let kind = event.kind();

    let record = tokio::task::spawn_blocking(move || -> Result<AdminNotificationRecord, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO admin_notifications (id, kind, title, message, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, kind, title, message, detail_json],
        )?;
        let created_at: String = conn.query_row(
            "SELECT created_at FROM admin_notifications WHERE id = ?1",
            [&id],
            |row| row.get(0),
        )?;

        Ok(AdminNotificationRecord {
            id,
            kind: kind.to_string(),
            title,
            message,
            detail: event,
            read: false,
            created_at,
        })
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    state
        .registry
        .send_to_admins(&ServerEvent::AdminNotification(record.clone()));

    Ok(record)
}

/// Resolve the caller in the admins table or refuse. The token only proves
/// identity; this is what gates the admin notification surface.
async fn require_admin(db: &DbPool, identity_id: &str) -> Result<(), GatewayError> {
    let db = db.clone();
    let id = identity_id.to_string();

    let is_admin = tokio::task::spawn_blocking(move || -> Result<bool, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM admins WHERE id = ?1)",
            [&id],
            |row| row.get(0),
        )?;
        Ok(exists)
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    if is_admin {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

/// Raw row before the `detail` JSON is decoded into the tagged union.
struct RawRow {
    id: String,
    kind: String,
    title: String,
    message: String,
    detail_json: String,
    read: bool,
    created_at: String,
}

fn raw_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        detail_json: row.get(4)?,
        read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

// --- REST surface (admin-gated) ---

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub before: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub notifications: Vec<AdminNotificationRecord>,
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

/// GET /api/admin/notifications — newest first, paginated by id.
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, GatewayError> {
    require_admin(&state.db, &claims.sub).await?;

    let db = state.db.clone();
    let before = query.before.clone();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let response = tokio::task::spawn_blocking(move || -> Result<ListResponse, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let mut stmt = conn.prepare(
            "SELECT id, kind, title, message, detail, read, created_at
             FROM admin_notifications
             WHERE (?1 IS NULL OR id < ?1)
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let rows: Vec<RawRow> = stmt
            .query_map(rusqlite::params![before, i64::from(limit) + 1], raw_from_row)?
            .collect::<Result<_, _>>()?;

        let has_more = rows.len() > limit as usize;
        let mut notifications = Vec::with_capacity(rows.len().min(limit as usize));
        for row in rows.into_iter().take(limit as usize) {
            notifications.push(AdminNotificationRecord {
                detail: serde_json::from_str(&row.detail_json)?,
                id: row.id,
                kind: row.kind,
                title: row.title,
                message: row.message,
                read: row.read,
                created_at: row.created_at,
            });
        }

        Ok(ListResponse {
            notifications,
            has_more,
        })
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(response))
}

/// GET /api/admin/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<CountResponse>, GatewayError> {
    require_admin(&state.db, &claims.sub).await?;

    let db = state.db.clone();
    let count = tokio::task::spawn_blocking(move || -> Result<i64, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM admin_notifications WHERE read = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(CountResponse { count }))
}

/// PUT /api/admin/notifications/read-all — global, any admin.
pub async fn read_all(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UpdatedResponse>, GatewayError> {
    require_admin(&state.db, &claims.sub).await?;

    let db = state.db.clone();
    let updated = tokio::task::spawn_blocking(move || -> Result<usize, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;
        let updated = conn.execute("UPDATE admin_notifications SET read = 1 WHERE read = 0", [])?;
        Ok(updated)
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(UpdatedResponse { updated }))
}

/// PUT /api/admin/notifications/{id}/read
pub async fn read_one(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<UpdatedResponse>, GatewayError> {
    require_admin(&state.db, &claims.sub).await?;

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;
        let updated = conn.execute(
            "UPDATE admin_notifications SET read = 1 WHERE id = ?1",
            [&id],
        )?;
        if updated == 0 {
            return Err(GatewayError::NotFound("notification"));
        }
        Ok(())
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(UpdatedResponse { updated: 1 }))
}

/// DELETE /api/admin/notifications/{id}
pub async fn delete_one(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<UpdatedResponse>, GatewayError> {
    require_admin(&state.db, &claims.sub).await?;

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;
        let deleted = conn.execute("DELETE FROM admin_notifications WHERE id = ?1", [&id])?;
        if deleted == 0 {
            return Err(GatewayError::NotFound("notification"));
        }
        Ok(())
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(UpdatedResponse { updated: 1 }))
}

/// DELETE /api/admin/notifications/read — purge everything already read.
pub async fn purge_read(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UpdatedResponse>, GatewayError> {
    require_admin(&state.db, &claims.sub).await?;

    let db = state.db.clone();
    let deleted = tokio::task::spawn_blocking(move || -> Result<usize, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;
        let deleted = conn.execute("DELETE FROM admin_notifications WHERE read = 1", [])?;
        Ok(deleted)
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(UpdatedResponse { updated: deleted }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_store_constraint() {
        let event = AdminEvent::ContactRequest {
            first_name: "Jo".into(),
            last_name: "Doe".into(),
            email: "jo@x.com".into(),
        };
        assert_eq!(event.kind(), "contact_request");

        // Tagged-union round trip: the stored JSON decodes to the same variant.
        let json = serde_json::to_string(&event).unwrap();
        let back: AdminEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
