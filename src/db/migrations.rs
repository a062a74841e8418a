use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Identities, chat, notifications

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'patient' CHECK (role IN ('patient', 'professional')),
    is_online INTEGER NOT NULL DEFAULT 0,
    last_seen TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE admins (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One-to-one conversations. Participant order is normalized
-- (lexicographically smaller id is participant_a) so the UNIQUE
-- constraint makes find-or-create race-free.
CREATE TABLE conversations (
    id TEXT PRIMARY KEY,
    participant_a TEXT,
    participant_b TEXT,
    last_message_id TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(participant_a, participant_b)
);
CREATE INDEX idx_conversations_a ON conversations(participant_a);
CREATE INDEX idx_conversations_b ON conversations(participant_b);

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    receiver_id TEXT,
    content TEXT NOT NULL,
    attachment_url TEXT,
    attachment_type TEXT,
    attachment_name TEXT,
    read INTEGER NOT NULL DEFAULT 0,
    edited INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);

-- Per-viewer soft-delete markers: a hidden message stays visible
-- to the other participant.
CREATE TABLE message_hidden (
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- Identities that have read a message. Inserts are INSERT OR IGNORE,
-- so repeated mark-read calls are idempotent.
CREATE TABLE message_reads (
    message_id TEXT NOT NULL,
    reader_id TEXT NOT NULL,
    read_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (message_id, reader_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE notifications (
    id TEXT PRIMARY KEY,
    recipient_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('like', 'comment', 'reply')),
    post_id TEXT NOT NULL,
    preview TEXT,
    read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX idx_notifications_recipient ON notifications(recipient_id, read);

-- Operational notifications are visible to all admins; read state is global.
CREATE TABLE admin_notifications (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN (
        'user_login', 'user_signup', 'contact_request',
        'verification_request', 'verification_update', 'new_post'
    )),
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    detail TEXT NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX idx_admin_notifications_read ON admin_notifications(read);
",
        ),
        M::up(
            "-- Migration 2: Group conversations

ALTER TABLE conversations ADD COLUMN kind TEXT NOT NULL DEFAULT 'direct';
ALTER TABLE conversations ADD COLUMN group_name TEXT;

CREATE TABLE conversation_members (
    conversation_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    joined_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
CREATE INDEX idx_conversation_members_user ON conversation_members(user_id);
",
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_cleanly() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        migrations().to_latest(&mut conn).unwrap();

        // The normalized-pair constraint must reject a duplicate conversation.
        conn.execute(
            "INSERT INTO conversations (id, participant_a, participant_b) VALUES ('c1', 'u1', 'u2')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO conversations (id, participant_a, participant_b) VALUES ('c2', 'u1', 'u2')",
            [],
        );
        assert!(dup.is_err());
    }
}
