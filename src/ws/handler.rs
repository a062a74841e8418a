use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::presence::{Identity, Role};
use crate::state::AppState;
use crate::ws::actor;

/// Out-of-band credential fields presented at connection time.
/// `isAdmin` selects which identity table the token's subject resolves
/// against.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(rename = "isAdmin", default)]
    pub is_admin: bool,
}

/// WebSocket close codes for typed handshake rejections:
/// 4000 = token missing
/// 4001 = token expired
/// 4002 = token invalid
/// 4003 = identity not found
const CLOSE_TOKEN_MISSING: u16 = 4000;
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;
const CLOSE_IDENTITY_UNKNOWN: u16 = 4003;

/// GET /ws?token=JWT&isAdmin=bool
/// WebSocket upgrade endpoint. Authenticates via query parameters.
/// On auth failure, upgrades then immediately closes with the typed close
/// code — before any registration or room join. On success, spawns an
/// actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match authenticate(&state, params).await {
        Ok(identity) => {
            tracing::info!(
                identity = %identity.id,
                role = ?identity.role,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity))
        }
        Err((close_code, reason)) => {
            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );

            // Upgrade the connection, then immediately close with the code
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}

/// Resolve the handshake credential to an identity, or a typed rejection.
/// No state is mutated on any failure path.
async fn authenticate(
    state: &AppState,
    params: WsAuthQuery,
) -> Result<Identity, (u16, &'static str)> {
    let Some(token) = params.token else {
        return Err((CLOSE_TOKEN_MISSING, "Token missing"));
    };

    let claims =
        jwt::validate_access_token(&state.jwt_secret, &token).map_err(|err| match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                (CLOSE_TOKEN_EXPIRED, "Token expired")
            }
            _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
        })?;

    let db = state.db.clone();
    let is_admin = params.is_admin;
    let sub = claims.sub.clone();

    let display_name = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        let query = if is_admin {
            "SELECT display_name FROM admins WHERE id = ?1"
        } else {
            "SELECT display_name FROM users WHERE id = ?1"
        };
        conn.query_row(query, [&sub], |row| row.get::<_, String>(0))
            .ok()
    })
    .await
    .ok()
    .flatten();

    match display_name {
        Some(display_name) => Ok(Identity {
            id: claims.sub,
            role: if is_admin { Role::Admin } else { Role::User },
            display_name,
        }),
        None => Err((CLOSE_IDENTITY_UNKNOWN, "Identity not found")),
    }
}
