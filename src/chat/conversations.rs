//! REST endpoint listing a user's conversations.
//!
//! Direct conversations are the normalized participant pair; group
//! conversations resolve membership through the roster table. Both carry a
//! last-message preview when the pointer is set.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageSummary {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub kind: String,
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessageSummary>,
    pub updated_at: String,
}

/// GET /api/conversations — all conversations the caller belongs to,
/// most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ConversationSummary>>, GatewayError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let summaries = tokio::task::spawn_blocking(move || -> Result<Vec<ConversationSummary>, GatewayError> {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let mut stmt = conn.prepare(
            "SELECT c.id, c.kind, c.participant_a, c.participant_b, c.group_name, c.updated_at,
                    m.id, m.sender_id, m.content, m.created_at
             FROM conversations c
             LEFT JOIN messages m ON m.id = c.last_message_id
             WHERE c.participant_a = ?1 OR c.participant_b = ?1
                OR c.id IN (SELECT conversation_id FROM conversation_members WHERE user_id = ?1)
             ORDER BY c.updated_at DESC",
        )?;

        struct Row {
            id: String,
            kind: String,
            participant_a: Option<String>,
            participant_b: Option<String>,
            group_name: Option<String>,
            updated_at: String,
            last_message: Option<LastMessageSummary>,
        }

        let rows: Vec<Row> = stmt
            .query_map([&user_id], |row| {
                let last_id: Option<String> = row.get(6)?;
                let last_message = match last_id {
                    Some(id) => Some(LastMessageSummary {
                        id,
                        sender_id: row.get(7)?,
                        content: row.get(8)?,
                        created_at: row.get(9)?,
                    }),
                    None => None,
                };
                Ok(Row {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    participant_a: row.get(2)?,
                    participant_b: row.get(3)?,
                    group_name: row.get(4)?,
                    updated_at: row.get(5)?,
                    last_message,
                })
            })?
            .collect::<Result<_, _>>()?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let participants = if row.kind == "group" {
                let mut stmt = conn.prepare(
                    "SELECT user_id FROM conversation_members WHERE conversation_id = ?1",
                )?;
                let members = stmt
                    .query_map([&row.id], |r| r.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                members
            } else {
                [row.participant_a, row.participant_b]
                    .into_iter()
                    .flatten()
                    .collect()
            };

            summaries.push(ConversationSummary {
                id: row.id,
                kind: row.kind,
                participants,
                group_name: row.group_name,
                last_message: row.last_message,
                updated_at: row.updated_at,
            });
        }

        Ok(summaries)
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(summaries))
}
