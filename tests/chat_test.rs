//! Integration tests for the REST chat surface: history round-trips,
//! read-state idempotence, ownership enforcement, and per-viewer clears.

mod common;

use common::*;
use mindbridge_server::chat::engine;
use mindbridge_server::notify::social;

async fn send(server: &TestServer, from: &str, to: &str, content: &str) -> serde_json::Value {
    let record = engine::send_message(&server.state, from, to, content.to_string(), None)
        .await
        .expect("send_message failed");
    serde_json::to_value(record).unwrap()
}

fn bearer(server: &TestServer, id: &str) -> String {
    format!("Bearer {}", token_for(server, id))
}

#[tokio::test]
async fn send_round_trips_through_history() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");

    let sent = send(&server, "u1", "u2", "hello").await;
    let conversation_id = sent["conversationId"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .get(format!(
            "{}/api/conversations/{}/messages",
            server.base_url, conversation_id
        ))
        .header("Authorization", bearer(&server, "u2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["senderId"], "u1");
    assert_eq!(messages[0]["receiverId"], "u2");
    assert_eq!(messages[0]["content"], "hello");
    assert_eq!(messages[0]["read"], false);
}

#[tokio::test]
async fn repeated_sends_reuse_one_conversation_per_pair() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");

    // Both directions of the unordered pair land in the same conversation
    let first = send(&server, "u1", "u2", "one").await;
    let second = send(&server, "u2", "u1", "two").await;
    assert_eq!(first["conversationId"], second["conversationId"]);

    let count: i64 = {
        let conn = server.state.db.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
            .unwrap()
    };
    assert_eq!(count, 1);
}

#[tokio::test]
async fn mark_read_is_idempotent_and_never_marks_own_messages() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");

    send(&server, "u1", "u2", "one").await;
    send(&server, "u1", "u2", "two").await;
    let mine = send(&server, "u2", "u1", "reply").await;
    let conversation_id = mine["conversationId"].as_str().unwrap().to_string();

    let first = engine::mark_read(&server.state, &conversation_id, "u2")
        .await
        .unwrap();
    assert_eq!(first, 2);

    // Same call again: nothing new to mark
    let second = engine::mark_read(&server.state, &conversation_id, "u2")
        .await
        .unwrap();
    assert_eq!(second, 0);

    // u2's own message was never marked read-by-self
    let self_reads: i64 = {
        let conn = server.state.db.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM message_reads r
             JOIN messages m ON m.id = r.message_id
             WHERE m.sender_id = r.reader_id",
            [],
            |row| row.get(0),
        )
        .unwrap()
    };
    assert_eq!(self_reads, 0);
}

#[tokio::test]
async fn edit_by_non_sender_is_rejected_without_mutation() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");

    let sent = send(&server, "u1", "u2", "original").await;
    let message_id = sent["id"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .put(format!("{}/api/messages/{}", server.base_url, message_id))
        .header("Authorization", bearer(&server, "u2"))
        .json(&serde_json::json!({ "content": "hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let content: String = {
        let conn = server.state.db.lock().unwrap();
        conn.query_row(
            "SELECT content FROM messages WHERE id = ?1",
            [message_id],
            |row| row.get(0),
        )
        .unwrap()
    };
    assert_eq!(content, "original");
}

#[tokio::test]
async fn delete_by_non_sender_is_rejected() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");

    let sent = send(&server, "u1", "u2", "keep me").await;
    let message_id = sent["id"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("{}/api/messages/{}", server.base_url, message_id))
        .header("Authorization", bearer(&server, "u2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let count: i64 = {
        let conn = server.state.db.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap()
    };
    assert_eq!(count, 1);
}

#[tokio::test]
async fn delete_by_sender_detaches_last_message_pointer() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");

    let sent = send(&server, "u1", "u2", "going away").await;
    let message_id = sent["id"].as_str().unwrap();
    let conversation_id = sent["conversationId"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("{}/api/messages/{}", server.base_url, message_id))
        .header("Authorization", bearer(&server, "u1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let last: Option<String> = {
        let conn = server.state.db.lock().unwrap();
        conn.query_row(
            "SELECT last_message_id FROM conversations WHERE id = ?1",
            [conversation_id],
            |row| row.get(0),
        )
        .unwrap()
    };
    assert!(last.is_none());
}

#[tokio::test]
async fn clear_hides_messages_for_viewer_only() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");

    let sent = send(&server, "u1", "u2", "hello").await;
    let conversation_id = sent["conversationId"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .delete(format!(
            "{}/api/conversations/{}/messages",
            server.base_url, conversation_id
        ))
        .header("Authorization", bearer(&server, "u2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // u2's view is empty
    let u2_view: serde_json::Value = client
        .get(format!(
            "{}/api/conversations/{}/messages",
            server.base_url, conversation_id
        ))
        .header("Authorization", bearer(&server, "u2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(u2_view["messages"].as_array().unwrap().is_empty());

    // u1 still sees the message
    let u1_view: serde_json::Value = client
        .get(format!(
            "{}/api/conversations/{}/messages",
            server.base_url, conversation_id
        ))
        .header("Authorization", bearer(&server, "u1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(u1_view["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn outsider_cannot_read_conversation_history() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");
    seed_user(&server, "u3", "Casey");

    let sent = send(&server, "u1", "u2", "private").await;
    let conversation_id = sent["conversationId"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .get(format!(
            "{}/api/conversations/{}/messages",
            server.base_url, conversation_id
        ))
        .header("Authorization", bearer(&server, "u3"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn conversation_list_carries_last_message_preview() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");

    send(&server, "u1", "u2", "first").await;
    send(&server, "u1", "u2", "latest").await;

    let client = reqwest::Client::new();
    let list: serde_json::Value = client
        .get(format!("{}/api/conversations", server.base_url))
        .header("Authorization", bearer(&server, "u1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let conversations = list.as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["lastMessage"]["content"], "latest");
    assert!(conversations[0]["participants"]
        .as_array()
        .unwrap()
        .iter()
        .any(|id| id == "u2"));
}

#[tokio::test]
async fn group_create_and_roster_update() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");
    seed_user(&server, "u3", "Casey");

    let client = reqwest::Client::new();
    let created: serde_json::Value = client
        .post(format!("{}/api/conversations/groups", server.base_url))
        .header("Authorization", bearer(&server, "u1"))
        .json(&serde_json::json!({ "name": "Peer circle", "memberIds": ["u2"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let group_id = created["id"].as_str().unwrap();
    let members = created["memberIds"].as_array().unwrap();
    assert_eq!(members.len(), 2); // creator is always on the roster

    // Non-member cannot touch the roster
    let forbidden = client
        .put(format!(
            "{}/api/conversations/groups/{}",
            server.base_url, group_id
        ))
        .header("Authorization", bearer(&server, "u3"))
        .json(&serde_json::json!({ "name": "Taken over" }))
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    let updated: serde_json::Value = client
        .put(format!(
            "{}/api/conversations/groups/{}",
            server.base_url, group_id
        ))
        .header("Authorization", bearer(&server, "u1"))
        .json(&serde_json::json!({ "memberIds": ["u1", "u2", "u3"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["memberIds"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn social_create_populates_sender_name() {
    let server = start_test_server().await;
    seed_user(&server, "u1", "Avery");
    seed_user(&server, "u2", "Brooke");

    let record = social::create(
        &server.state,
        "u2",
        "u1",
        social::SocialEvent::Comment {
            post_id: "p1".into(),
            preview: "nice post".into(),
        },
    )
    .await
    .unwrap()
    .expect("notification should be created");

    assert_eq!(record.sender_name, "Avery");
    assert_eq!(record.kind, "comment");
    assert!(!record.read);
}
