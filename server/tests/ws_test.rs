//! End-to-end tests over a real socket: registration, login, session
//! restore, multi-tab delivery, presence and the unauthenticated paths.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use forum_server::config::{Config, WsConfig};
use forum_server::db::{self, SqliteStore};
use forum_server::routes;
use forum_server::state::AppState;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Helper: start the server on a random port and return its address.
async fn start_test_server() -> SocketAddr {
    start_server_with(Config::default()).await
}

async fn start_server_with(config: Config) -> SocketAddr {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let pool = db::init_db(&data_dir).expect("Failed to init DB");
    let store = SqliteStore::new(pool).with_hash_cost(4);
    let state = AppState::new(store, &config);
    let app = routes::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        // Keep tmp_dir alive so the database isn't deleted
        let _keep = tmp_dir;
    });

    addr
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Failed to connect");
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next text frame, decoded. Panics after two seconds of silence.
async fn next_frame(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Expected a frame within timeout")
            .expect("Stream ended")
            .expect("Receive error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Skip frames until one of type `tag` arrives.
async fn next_of_type(ws: &mut Ws, tag: &str) -> Value {
    loop {
        let frame = next_frame(ws).await;
        if frame["type"] == tag {
            return frame;
        }
    }
}

/// Read and discard until the socket has been quiet for a moment.
async fn drain(ws: &mut Ws) -> Vec<Value> {
    let mut seen = Vec::new();
    while let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_millis(200), ws.next()).await {
        if let Message::Text(text) = msg {
            seen.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    seen
}

async fn register(ws: &mut Ws, nickname: &str) {
    send(
        ws,
        json!({"type": "register", "data": {"user": {
            "nickname": nickname,
            "first_name": "Test",
            "last_name": "User",
            "email": format!("{}@example.com", nickname),
            "age": 25,
            "gender": "other",
            "password": "hunter22"
        }}}),
    )
    .await;
    let reply = next_of_type(ws, "register_result").await;
    assert_eq!(reply["status"], "ok", "register failed: {}", reply);
}

/// Log in and return `(user_id, session_id)`.
async fn login(ws: &mut Ws, identifier: &str) -> (String, String) {
    send(
        ws,
        json!({"type": "login", "data": {"user": {"email_or_nickname": identifier, "password": "hunter22"}}}),
    )
    .await;
    let reply = next_of_type(ws, "login_result").await;
    assert_eq!(reply["status"], "ok", "login failed: {}", reply);
    (
        reply["data"]["user"]["user_id"].as_str().unwrap().to_string(),
        reply["data"]["user"]["session_id"].as_str().unwrap().to_string(),
    )
}

async fn restore(ws: &mut Ws, session_id: &str) -> Value {
    send(ws, json!({"type": "session_check", "data": {"user": {"session_id": session_id}}})).await;
    next_of_type(ws, "session_check_result").await
}

#[tokio::test]
async fn test_health_check() {
    let addr = start_test_server().await;
    let body = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_register_login_and_session_restore() {
    let addr = start_test_server().await;
    let mut ws = connect(addr).await;

    register(&mut ws, "alice").await;
    let (user_id, session_id) = login(&mut ws, "alice@example.com").await;

    let mut tab = connect(addr).await;
    let restored = restore(&mut tab, &session_id).await;
    assert_eq!(restored["status"], "ok");
    assert_eq!(restored["data"]["user"]["user_id"], user_id.as_str());
    assert_eq!(restored["data"]["user"]["nickname"], "alice");
    assert!(restored["data"]["user"].get("password").is_none());
}

#[tokio::test]
async fn test_bad_login_echoes_identifier_only() {
    let addr = start_test_server().await;
    let mut ws = connect(addr).await;
    register(&mut ws, "bob").await;

    send(
        &mut ws,
        json!({"type": "login", "data": {"user": {"email_or_nickname": "bob", "password": "nope-nope"}}}),
    )
    .await;
    let reply = next_of_type(&mut ws, "login_result").await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["error"], "Invalid credentials");
    assert_eq!(reply["data"]["user"]["email_or_nickname"], "bob");
    assert!(!reply.to_string().contains("nope-nope"));
}

#[tokio::test]
async fn test_both_tabs_receive_identical_message() {
    let addr = start_test_server().await;

    let mut alice1 = connect(addr).await;
    register(&mut alice1, "alice").await;
    let (alice_id, alice_session) = login(&mut alice1, "alice").await;

    let mut alice2 = connect(addr).await;
    restore(&mut alice2, &alice_session).await;

    let mut bob = connect(addr).await;
    register(&mut bob, "bob").await;
    let (bob_id, _) = login(&mut bob, "bob").await;

    drain(&mut alice1).await;
    drain(&mut alice2).await;
    drain(&mut bob).await;

    send(
        &mut bob,
        json!({"type": "private_message", "data": {"recipient_id": alice_id, "content": "hi alice"}}),
    )
    .await;

    let tab1 = next_of_type(&mut alice1, "private_message").await;
    let tab2 = next_of_type(&mut alice2, "private_message").await;
    assert_eq!(tab1, tab2);
    assert_eq!(tab1["status"], "ok");
    assert_eq!(tab1["data"]["content"], "hi alice");
    assert_eq!(tab1["data"]["sender_id"], bob_id.as_str());
    assert_eq!(tab1["data"]["sender_nickname"], "bob");

    // The sender's own tab gets the echo
    let echo = next_of_type(&mut bob, "private_message").await;
    assert_eq!(echo["data"]["id"], tab1["data"]["id"]);
}

#[tokio::test]
async fn test_unauthenticated_private_message_is_rejected_and_not_stored() {
    let addr = start_test_server().await;

    let mut alice = connect(addr).await;
    register(&mut alice, "alice").await;
    let (alice_id, _) = login(&mut alice, "alice").await;

    let mut bob = connect(addr).await;
    register(&mut bob, "bob").await;

    send(
        &mut bob,
        json!({"type": "private_message", "data": {"recipient_id": alice_id, "content": "sneaky"}}),
    )
    .await;
    let reply = next_of_type(&mut bob, "private_message").await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["error"], "You must be logged in");

    let (bob_id, _) = login(&mut bob, "bob").await;
    drain(&mut alice).await;

    send(&mut alice, json!({"type": "get_chat_history", "data": {"with_user_id": bob_id}})).await;
    let history = next_of_type(&mut alice, "chat_history_result").await;
    assert_eq!(history["status"], "ok");
    assert_eq!(history["data"], json!([]));
}

#[tokio::test]
async fn test_roster_shows_online_users_most_recent_first() {
    let addr = start_test_server().await;

    let mut setup = connect(addr).await;
    register(&mut setup, "carol").await;

    let mut alice = connect(addr).await;
    register(&mut alice, "alice").await;
    let (alice_id, _) = login(&mut alice, "alice").await;

    let mut bob = connect(addr).await;
    register(&mut bob, "bob").await;
    login(&mut bob, "bob").await;

    drain(&mut bob).await;
    send(
        &mut bob,
        json!({"type": "private_message", "data": {"recipient_id": alice_id, "content": "ping"}}),
    )
    .await;
    next_of_type(&mut bob, "private_message").await;
    drain(&mut alice).await;

    send(&mut alice, json!({"type": "users_list"})).await;
    let roster = next_of_type(&mut alice, "users_list").await;
    let entries = roster["data"].as_array().unwrap();

    let order: Vec<&str> = entries.iter().map(|e| e["nickname"].as_str().unwrap()).collect();
    assert_eq!(order, vec!["bob", "alice", "carol"]);
    assert_eq!(entries[0]["isOnline"], true);
    assert_eq!(entries[0]["lastMsg"], "ping");
    assert_eq!(entries[1]["isOnline"], true);
    assert_eq!(entries[2]["isOnline"], false);
}

#[tokio::test]
async fn test_disconnect_broadcasts_only_for_authenticated_connections() {
    let addr = start_test_server().await;

    let mut alice = connect(addr).await;
    register(&mut alice, "alice").await;
    login(&mut alice, "alice").await;
    drain(&mut alice).await;

    // Anonymous connection comes and goes without a trace
    let mut anon = connect(addr).await;
    anon.send(Message::Close(None)).await.unwrap();
    drop(anon);
    assert!(drain(&mut alice).await.is_empty());

    let mut bob = connect(addr).await;
    register(&mut bob, "bob").await;
    login(&mut bob, "bob").await;
    let online = next_of_type(&mut alice, "users_list").await;
    let bob_entry = online["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["nickname"] == "bob")
        .unwrap()
        .clone();
    assert_eq!(bob_entry["isOnline"], true);

    bob.send(Message::Close(None)).await.unwrap();
    drop(bob);

    let offline = next_of_type(&mut alice, "users_list").await;
    let bob_entry = offline["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["nickname"] == "bob")
        .unwrap()
        .clone();
    assert_eq!(bob_entry["isOnline"], false);
}

#[tokio::test]
async fn test_garbage_frame_gets_error_and_connection_survives() {
    let addr = start_test_server().await;
    let mut ws = connect(addr).await;

    ws.send(Message::Text("definitely not json".into())).await.unwrap();
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["status"], "error");

    // Unknown types are ignored
    send(&mut ws, json!({"type": "post_liked", "data": {}})).await;
    assert!(drain(&mut ws).await.is_empty());

    register(&mut ws, "dora").await;
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let addr = start_test_server().await;
    let mut ws = connect(addr).await;

    ws.send(Message::Ping(vec![42, 43, 44].into())).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected pong within timeout");
    match msg {
        Some(Ok(Message::Pong(data))) => assert_eq!(&data[..], &[42u8, 43, 44]),
        other => panic!("Expected Pong, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unresponsive_client_is_dropped_after_pong_timeout() {
    let addr = start_server_with(Config {
        ws: WsConfig {
            ping_interval_secs: 1,
            pong_timeout_secs: 1,
            ..WsConfig::default()
        },
        ..Config::default()
    })
    .await;

    // Alice signs in and then never reads again, so her pings go unanswered
    let mut alice = connect(addr).await;
    register(&mut alice, "alice").await;
    login(&mut alice, "alice").await;

    let mut bob = connect(addr).await;
    register(&mut bob, "bob").await;
    login(&mut bob, "bob").await;

    // Bob keeps reading, which also answers his own pings
    let deadline = tokio::time::Instant::now() + Duration::from_secs(8);
    loop {
        let roster = tokio::time::timeout_at(deadline, next_of_type(&mut bob, "users_list"))
            .await
            .expect("alice was never reported offline");
        let alice_online = roster["data"]
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["nickname"] == "alice")
            .map(|e| e["isOnline"] == true)
            .unwrap();
        if !alice_online {
            break;
        }
    }

    // Bob answered every ping and is still connected
    send(&mut bob, json!({"type": "users_list"})).await;
    let roster = next_of_type(&mut bob, "users_list").await;
    let bob_entry = roster["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["nickname"] == "bob")
        .unwrap()
        .clone();
    assert_eq!(bob_entry["isOnline"], true);
    drop(alice);
}
