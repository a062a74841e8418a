//! Presence registry: the single owner of all live-connection state.
//!
//! Tracks which identities currently have open WebSocket connections and
//! provides the room addressing used for fan-out: each identity's own room
//! (keyed by its id) and the shared admin room (derived from the stored
//! role). All register/unregister/lookup operations go through this one
//! structure; nothing else in the gateway holds connection handles.
//!
//! The map is a liveness cache, not a durable ledger — a crashed process
//! loses it entirely. The durable fallback is `users.is_online`/`last_seen`,
//! updated here at connect/disconnect for end-users.

use axum::extract::ws::Message;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::db::DbPool;
use crate::ws::protocol::ServerEvent;

/// Sender half of a WebSocket connection's channel. Any part of the system
/// can clone this to push frames to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Which identity table a connection resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// An authenticated connection's identity, attached at handshake time.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: String,
    pub role: Role,
    pub display_name: String,
}

struct Entry {
    role: Role,
    senders: Vec<ConnectionSender>,
}

/// Live-connection registry. An identity may hold several concurrent
/// connections (multi-tab); fan-out reaches all of them.
pub struct PresenceRegistry {
    entries: DashMap<String, Entry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a connection. Joining the identity's own room is implicit
    /// (the registry key is the room); admins additionally belong to the
    /// shared admin room via their stored role.
    pub fn register(&self, id: &str, role: Role, sender: ConnectionSender) {
        let mut entry = self
            .entries
            .entry(id.to_string())
            .or_insert_with(|| Entry {
                role,
                senders: Vec::new(),
            });
        entry.senders.push(sender);
        let count = entry.senders.len();
        drop(entry);

        tracing::debug!(identity = %id, connections = count, "Connection registered");
    }

    /// Drop one closed connection for an identity. Returns true when that
    /// was the identity's last connection and the entry was removed — only
    /// then does the caller issue the durable offline update and the
    /// presence broadcast.
    pub fn unregister(&self, id: &str, sender: &ConnectionSender) -> bool {
        let mut remove_entry = false;

        if let Some(mut entry) = self.entries.get_mut(id) {
            entry
                .senders
                .retain(|s| !s.is_closed() && !s.same_channel(sender));
            remove_entry = entry.senders.is_empty();
        }

        if remove_entry {
            self.entries.remove(id);
        }

        tracing::debug!(identity = %id, fully_offline = remove_entry, "Connection unregistered");
        remove_entry
    }

    /// Whether the identity currently has at least one live connection.
    pub fn is_live(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Sorted ids of every identity currently present.
    pub fn snapshot_identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn frame(event: &ServerEvent) -> Option<Message> {
        match serde_json::to_string(event) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server event");
                None
            }
        }
    }

    /// Emit to an identity's room (all of its connections). Emitting to an
    /// identity with no live connection is a safe no-op.
    pub fn send_to_identity(&self, id: &str, event: &ServerEvent) {
        let Some(msg) = Self::frame(event) else {
            return;
        };
        if let Some(entry) = self.entries.get(id) {
            for sender in entry.senders.iter() {
                let _ = sender.send(msg.clone());
            }
        }
    }

    /// Emit to the shared admin room. No connected admins is a no-op, not
    /// an error.
    pub fn send_to_admins(&self, event: &ServerEvent) {
        let Some(msg) = Self::frame(event) else {
            return;
        };
        for entry in self.entries.iter() {
            if entry.value().role == Role::Admin {
                for sender in entry.value().senders.iter() {
                    let _ = sender.send(msg.clone());
                }
            }
        }
    }

    /// Emit to every live connection.
    pub fn broadcast(&self, event: &ServerEvent) {
        let Some(msg) = Self::frame(event) else {
            return;
        };
        for entry in self.entries.iter() {
            for sender in entry.value().senders.iter() {
                let _ = sender.send(msg.clone());
            }
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// --- Durable presence (end-users only) ---

/// Persist `is_online = true` for a user at connect time. A store failure
/// here is logged and does not tear down the connection — the registry is
/// authoritative while the process lives.
pub async fn mark_online(db: &DbPool, user_id: &str) {
    let db = db.clone();
    let uid = user_id.to_string();
    let result = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| "DB lock poisoned".to_string())?;
        conn.execute(
            "UPDATE users SET is_online = 1 WHERE id = ?1",
            [&uid],
        )
        .map_err(|e| e.to_string())?;
        Ok::<_, String>(())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to persist online flag");
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Online persistence task failed");
        }
    }
}

/// Persist `is_online = false, last_seen = now` at disconnect. Returns the
/// written timestamp for the presence broadcast, or None if the write
/// failed (logged, connection teardown continues).
pub async fn mark_offline(db: &DbPool, user_id: &str) -> Option<String> {
    let db = db.clone();
    let uid = user_id.to_string();
    let last_seen = Utc::now().to_rfc3339();
    let written = last_seen.clone();

    let result = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| "DB lock poisoned".to_string())?;
        conn.execute(
            "UPDATE users SET is_online = 0, last_seen = ?1 WHERE id = ?2",
            rusqlite::params![written, uid],
        )
        .map_err(|e| e.to_string())?;
        Ok::<_, String>(())
    })
    .await;

    match result {
        Ok(Ok(())) => Some(last_seen),
        Ok(Err(e)) => {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to persist offline state");
            None
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Offline persistence task failed");
            None
        }
    }
}

// --- REST endpoint ---

/// GET /api/users/online — snapshot of identities currently present in the
/// registry. JWT auth required.
pub async fn online_users(
    axum::extract::State(state): axum::extract::State<crate::state::AppState>,
    _claims: crate::auth::middleware::Claims,
) -> axum::Json<Vec<String>> {
    axum::Json(state.registry.snapshot_identities())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (ConnectionSender, mpsc::UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_and_snapshot() {
        let registry = PresenceRegistry::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        registry.register("u2", Role::User, tx_a);
        registry.register("u1", Role::User, tx_b);

        assert!(registry.is_live("u1"));
        assert_eq!(registry.snapshot_identities(), vec!["u1", "u2"]);
    }

    #[test]
    fn unregister_reports_last_connection_only() {
        let registry = PresenceRegistry::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        registry.register("u1", Role::User, tx_a.clone());
        registry.register("u1", Role::User, tx_b.clone());

        assert!(!registry.unregister("u1", &tx_a));
        assert!(registry.is_live("u1"));
        assert!(registry.unregister("u1", &tx_b));
        assert!(!registry.is_live("u1"));
    }

    #[test]
    fn emit_to_absent_identity_is_noop() {
        let registry = PresenceRegistry::new();
        // Must not panic or error with zero members in the room.
        registry.send_to_identity(
            "ghost",
            &ServerEvent::Error {
                message: "x".into(),
            },
        );
        registry.send_to_admins(&ServerEvent::Error {
            message: "x".into(),
        });
    }

    #[test]
    fn admin_room_excludes_users() {
        let registry = PresenceRegistry::new();
        let (user_tx, mut user_rx) = channel();
        let (admin_tx, mut admin_rx) = channel();
        registry.register("u1", Role::User, user_tx);
        registry.register("a1", Role::Admin, admin_tx);

        registry.send_to_admins(&ServerEvent::Error {
            message: "admins only".into(),
        });

        assert!(admin_rx.try_recv().is_ok());
        assert!(user_rx.try_recv().is_err());
    }
}
