//! REST endpoints for message history and message mutation.
//!
//! History filters out rows the viewer soft-deleted; the counterpart still
//! sees them. Edit and delete enforce sender ownership in the engine and
//! relay the change to the other participants' rooms.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::engine::{self, MessageRecord, MESSAGE_COLUMNS};
use crate::error::GatewayError;
use crate::state::AppState;

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageRecord>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct UpdatedResponse {
    pub updated: usize,
}

/// GET /api/conversations/{id}/messages?before={id}&limit={n}
/// Paginated history, newest first, viewer-hidden rows excluded.
/// Caller must be a participant.
pub async fn list_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, GatewayError> {
    let db = state.db.clone();
    let viewer = claims.sub.clone();
    let conv_id = conversation_id;
    let before = query.before.clone();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let response = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| GatewayError::Lock)?;

        let members = engine::participants(&conn, &conv_id)?;
        if !members.iter().any(|id| id == &viewer) {
            return Err(GatewayError::Unauthorized);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
               AND (?2 IS NULL OR id < ?2)
               AND NOT EXISTS (
                   SELECT 1 FROM message_hidden h
                   WHERE h.message_id = messages.id AND h.user_id = ?3
               )
             ORDER BY id DESC
             LIMIT ?4"
        ))?;

        let mut messages: Vec<MessageRecord> = stmt
            .query_map(
                rusqlite::params![conv_id, before, viewer, i64::from(limit) + 1],
                engine::message_from_row,
            )?
            .collect::<Result<_, _>>()?;

        let has_more = messages.len() > limit as usize;
        messages.truncate(limit as usize);

        Ok(HistoryResponse { messages, has_more })
    })
    .await
    .map_err(|_| GatewayError::Join)??;

    Ok(Json(response))
}

/// POST /api/conversations/{id}/read — mark everything not sent by the
/// caller as read; idempotent. Broadcasts a read-receipt to all
/// participants.
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<UpdatedResponse>, GatewayError> {
    let updated = engine::mark_read(&state, &conversation_id, &claims.sub).await?;
    Ok(Json(UpdatedResponse { updated }))
}

/// DELETE /api/conversations/{id}/messages — clear the conversation for
/// the caller only (soft delete).
pub async fn clear_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<UpdatedResponse>, GatewayError> {
    let hidden = engine::clear_for_viewer(&state, &conversation_id, &claims.sub).await?;
    Ok(Json(UpdatedResponse { updated: hidden }))
}

/// PUT /api/messages/{id} — edit own message; relays the new body.
pub async fn edit_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<EditMessageRequest>,
) -> Result<Json<MessageRecord>, GatewayError> {
    let content = body.content.trim().to_string();
    if content.is_empty() {
        return Err(GatewayError::Invalid("content must not be empty"));
    }

    let record = engine::edit_message(&state, &claims.sub, &message_id, content).await?;
    Ok(Json(record))
}

/// DELETE /api/messages/{id} — hard-delete own message; relays the
/// deletion.
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    engine::delete_message(&state, &claims.sub, &message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
