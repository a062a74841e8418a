//! Group conversations: a roster-keyed variant of the conversation model.
//!
//! Creation and roster changes happen over REST; live members learn about
//! them through `group_created` / `group_update` events on their own rooms.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::error::GatewayError;
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;

/// Group roster snapshot as delivered over the wire and the REST API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    pub member_ids: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub member_ids: Option<Vec<String>>,
}

fn group_members(
    conn: &rusqlite::Connection,
    group_id: &str,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM conversation_members WHERE conversation_id = ?1")?;
    let members = stmt
        .query_map([group_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>();
    members
}

/// POST /api/conversations/groups — create a group conversation. The
/// creator is always on the roster. Live members receive `group_created`.
pub async fn create_group(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupRecord>), GatewayError> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(GatewayError::Invalid("group name must not be empty"));
    }

    let db = state.db.clone();
    let creator = claims.sub.clone();
    let mut member_ids = body.member_ids.clone();
    member_ids.push(creator);
    member_ids.sort();
    member_ids.dedup();

    let record = tokio::task::spawn_blocking(move || -> Result<GroupRecord, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let group_id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO conversations (id, kind, group_name) VALUES (?1, 'group', ?2)",
            rusqlite::params![group_id, name],
        )?;
        for member in &member_ids {
            conn.execute(
                "INSERT INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![group_id, member],
            )?;
        }
        let created_at: String = conn.query_row(
            "SELECT created_at FROM conversations WHERE id = ?1",
            [&group_id],
            |row| row.get(0),
        )?;

        Ok(GroupRecord {
            id: group_id,
            name,
            member_ids,
            created_at,
        })
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    for member in &record.member_ids {
        state
            .registry
            .send_to_identity(member, &ServerEvent::GroupCreated(record.clone()));
    }

    Ok((StatusCode::CREATED, Json(record)))
}

/// PUT /api/conversations/groups/{id} — rename and/or replace the roster.
/// Caller must currently be a member. Both the old and the new roster
/// receive `group_update`, so removed members learn they are out.
pub async fn update_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
    Json(body): Json<UpdateGroupRequest>,
) -> Result<Json<GroupRecord>, GatewayError> {
    let db = state.db.clone();
    let actor = claims.sub.clone();
    let gid = group_id.clone();
    let new_name = body.name.clone();
    let new_roster = body.member_ids.clone();

    let (record, notify_ids) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let existing: Option<(String, Option<String>, String)> = conn
            .query_row(
                "SELECT kind, group_name, created_at FROM conversations WHERE id = ?1",
                [&gid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((kind, current_name, created_at)) = existing else {
            return Err(GatewayError::NotFound("group"));
        };
        if kind != "group" {
            return Err(GatewayError::NotFound("group"));
        }

        let old_members = group_members(&conn, &gid)?;
        if !old_members.iter().any(|id| id == &actor) {
            return Err(GatewayError::Unauthorized);
        }

        let name = match new_name {
            Some(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(GatewayError::Invalid("group name must not be empty"));
                }
                conn.execute(
                    "UPDATE conversations SET group_name = ?1, updated_at = datetime('now')
                     WHERE id = ?2",
                    rusqlite::params![name, gid],
                )?;
                name
            }
            None => current_name.unwrap_or_default(),
        };

        let members = match new_roster {
            Some(mut roster) => {
                roster.sort();
                roster.dedup();
                if roster.is_empty() {
                    return Err(GatewayError::Invalid("group roster must not be empty"));
                }
                conn.execute(
                    "DELETE FROM conversation_members WHERE conversation_id = ?1",
                    [&gid],
                )?;
                for member in &roster {
                    conn.execute(
                        "INSERT INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
                        rusqlite::params![gid, member],
                    )?;
                }
                roster
            }
            None => old_members.clone(),
        };

        // Removed members still get the update event
        let mut notify_ids = old_members;
        notify_ids.extend(members.iter().cloned());
        notify_ids.sort();
        notify_ids.dedup();

        Ok((
            GroupRecord {
                id: gid,
                name,
                member_ids: members,
                created_at,
            },
            notify_ids,
        ))
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    for member in &notify_ids {
        state
            .registry
            .send_to_identity(member, &ServerEvent::GroupUpdate(record.clone()));
    }

    Ok(Json(record))
}
