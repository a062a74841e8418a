//! Shared test harness: real server on a random port, tempdir database,
//! seeded identities, and WebSocket helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use mindbridge_server::presence::PresenceRegistry;
use mindbridge_server::state::AppState;
use mindbridge_server::{auth, db, routes};

pub type WsRead = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
pub type WsWrite = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    Message,
>;

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub state: AppState,
    _tmp: tempfile::TempDir,
}

/// Start the gateway on a random port with a fresh tempdir database.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret =
        auth::jwt::load_or_generate_jwt_secret(&data_dir).expect("Failed to generate JWT secret");

    let state = AppState {
        db,
        jwt_secret,
        registry: Arc::new(PresenceRegistry::new()),
    };

    let app = routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        state,
        _tmp: tmp_dir,
    }
}

pub fn seed_user(server: &TestServer, id: &str, display_name: &str) {
    let conn = server.state.db.lock().unwrap();
    conn.execute(
        "INSERT INTO users (id, display_name) VALUES (?1, ?2)",
        rusqlite::params![id, display_name],
    )
    .unwrap();
}

pub fn seed_admin(server: &TestServer, id: &str, display_name: &str) {
    let conn = server.state.db.lock().unwrap();
    conn.execute(
        "INSERT INTO admins (id, display_name) VALUES (?1, ?2)",
        rusqlite::params![id, display_name],
    )
    .unwrap();
}

pub fn token_for(server: &TestServer, identity_id: &str) -> String {
    auth::jwt::issue_access_token(&server.state.jwt_secret, identity_id, 900)
        .expect("Failed to issue token")
}

/// Open a WebSocket connection to a raw URL (no credential helpers).
pub async fn connect_raw(ws_url: &str) -> (WsWrite, WsRead) {
    let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

/// Open a WebSocket connection as the given identity.
pub async fn connect_ws(
    server: &TestServer,
    identity_id: &str,
    is_admin: bool,
) -> (WsWrite, WsRead) {
    let token = token_for(server, identity_id);
    let ws_url = format!(
        "ws://{}/ws?token={}&isAdmin={}",
        server.addr, token, is_admin
    );
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

/// Read frames until one decodes as the named event, skipping everything
/// else (presence snapshots etc.). Panics on timeout.
pub async fn wait_for_event(read: &mut WsRead, event_name: &str) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for '{}' event", event_name));

        match msg {
            Some(Ok(Message::Text(text))) => {
                let value: serde_json::Value =
                    serde_json::from_str(text.as_str()).expect("Frame is not valid JSON");
                if value["event"] == event_name {
                    return value;
                }
            }
            Some(Ok(_)) => continue,
            other => panic!(
                "Connection ended while waiting for '{}': {:?}",
                event_name, other
            ),
        }
    }
}

/// Assert that no frame with the named event arrives within the window.
pub async fn assert_no_event(read: &mut WsRead, event_name: &str, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: serde_json::Value =
                    serde_json::from_str(text.as_str()).expect("Frame is not valid JSON");
                assert_ne!(
                    value["event"], event_name,
                    "Unexpected '{}' event: {}",
                    event_name, value
                );
            }
            Ok(Some(Ok(_))) => continue,
            _ => return,
        }
    }
}

/// Build a client frame: {"event": ..., "data": ...}
pub fn client_frame(event: &str, data: serde_json::Value) -> Message {
    Message::Text(
        serde_json::json!({ "event": event, "data": data })
            .to_string()
            .into(),
    )
}
