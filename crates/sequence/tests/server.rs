//! Integration tests for the Sequence server: real WebSocket clients
//! joining lobbies through the full stack.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sequence::prelude::*;
use sequence_lobby::LobbyError;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

type Handle = ServerHandle<MemoryStore, OpeningTable>;

/// Starts a server on a random port and returns its address and handle.
async fn start_server() -> (String, Handle) {
    let server = SequenceServerBuilder::new()
        .bind("127.0.0.1:0")
        .build::<OpeningTable, _>(CookieAuthenticator::default())
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let handle = server.handle();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    (addr, handle)
}

async fn open_lobby(handle: &Handle, seats: usize) -> LobbyCode {
    handle
        .create_lobby(
            Settings {
                num_of_players: seats,
                ..Settings::default()
            },
            None,
        )
        .await
        .expect("lobby should be created")
}

/// Opens a socket to `path` with an optional `username` cookie.
async fn connect(addr: &str, path: &str, username: Option<&str>) -> ClientWs {
    let mut request = format!("ws://{addr}{path}")
        .into_client_request()
        .expect("valid url");
    if let Some(name) = username {
        request.headers_mut().insert(
            "Cookie",
            HeaderValue::from_str(&format!("username={name}")).expect("valid header"),
        );
    }
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("should connect");
    ws
}

/// Connects `name` to a lobby and waits until the lobby has registered
/// them, using the state sync as the acknowledgement.
async fn join(addr: &str, code: &LobbyCode, name: &str) -> ClientWs {
    let mut ws = connect(addr, &format!("/lobby/ws?lobby-id={code}"), Some(name)).await;
    send(&mut ws, "join_lobby", "").await;
    let sync = expect_frame(&mut ws, "join_lobby").await;
    assert_eq!(sync["sender"], name);
    ws
}

async fn send(ws: &mut ClientWs, action: &str, message: &str) {
    let text = serde_json::json!({ "action": action, "message": message }).to_string();
    ws.send(Message::Text(text.into()))
        .await
        .expect("send should succeed");
}

/// Next text frame, skipping control frames. `None` once the server
/// closed the socket.
async fn next_frame(ws: &mut ClientWs) -> Option<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame");
        match msg {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).expect("valid JSON frame"));
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn expect_frame(ws: &mut ClientWs, action: &str) -> Value {
    let frame = next_frame(ws).await.expect("connection closed early");
    assert_eq!(frame["action"], action, "unexpected frame {frame}");
    frame
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_two_players_ready_up_and_start() {
    let (addr, handle) = start_server().await;
    let code = open_lobby(&handle, 2).await;

    let mut alice = join(&addr, &code, "alice").await;
    let mut bob = join(&addr, &code, "bob").await;

    let joined = expect_frame(&mut alice, "join_lobby").await;
    assert_eq!(joined["sender"], "bob");
    assert_eq!(joined["connected_users"], serde_json::json!(["alice", "bob"]));

    send(&mut alice, "choose_color", "red").await;
    for ws in [&mut alice, &mut bob] {
        let frame = expect_frame(ws, "choose_color").await;
        assert_eq!(frame["player"]["color"], "red");
    }
    send(&mut bob, "choose_color", "green").await;
    for ws in [&mut alice, &mut bob] {
        expect_frame(ws, "choose_color").await;
    }

    send(&mut alice, "set_ready_status", "").await;
    for ws in [&mut alice, &mut bob] {
        expect_frame(ws, "set_ready_status").await;
    }
    send(&mut bob, "set_ready_status", "").await;
    for ws in [&mut alice, &mut bob] {
        expect_frame(ws, "set_ready_status").await;
        expect_frame(ws, "start_game").await;
        let change = expect_frame(ws, "change_state").await;
        assert_eq!(change["message"], "game");
    }

    let info = handle.lookup_lobby(&code).await.unwrap();
    assert_eq!(info.state, CurrentState::InGame);
    assert_eq!(info.players.len(), 2);
}

#[tokio::test]
async fn test_silent_tcp_peer_does_not_block_others() {
    let (addr, handle) = start_server().await;
    let code = open_lobby(&handle, 2).await;

    // Never sends the upgrade request.
    let _silent = tokio::net::TcpStream::connect(&addr)
        .await
        .expect("tcp connect");

    let alice = tokio::time::timeout(Duration::from_secs(5), join(&addr, &code, "alice"))
        .await
        .expect("second client should connect while the first is silent");
    drop(alice);
}

#[tokio::test]
async fn test_chat_reaches_everyone_in_order() {
    let (addr, handle) = start_server().await;
    let code = open_lobby(&handle, 3).await;
    let mut alice = join(&addr, &code, "alice").await;
    let mut bob = join(&addr, &code, "bob").await;
    expect_frame(&mut alice, "join_lobby").await;

    for i in 0..5 {
        send(&mut alice, "chat_message", &format!("line {i}")).await;
    }
    for ws in [&mut alice, &mut bob] {
        for i in 0..5 {
            let frame = expect_frame(ws, "new_chat_message").await;
            assert_eq!(frame["message"], format!("line {i}"));
            assert_eq!(frame["sender"], "alice");
        }
    }
}

#[tokio::test]
async fn test_taken_color_gets_notice() {
    let (addr, handle) = start_server().await;
    let code = open_lobby(&handle, 2).await;
    let mut alice = join(&addr, &code, "alice").await;
    let mut bob = join(&addr, &code, "bob").await;
    expect_frame(&mut alice, "join_lobby").await;

    send(&mut alice, "choose_color", "blue").await;
    expect_frame(&mut alice, "choose_color").await;
    expect_frame(&mut bob, "choose_color").await;

    send(&mut bob, "choose_color", "blue").await;
    let notice = expect_frame(&mut bob, "notice").await;
    assert!(notice["message"].as_str().unwrap().contains("taken"));
}

#[tokio::test]
async fn test_unknown_lobby_is_rejected() {
    let (addr, _handle) = start_server().await;

    let mut ws = connect(&addr, "/lobby/ws?lobby-id=ZZZZ", Some("alice")).await;
    let frame = expect_frame(&mut ws, "rejected").await;
    assert!(frame["message"].as_str().unwrap().contains("ZZZZ"));
    assert!(next_frame(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_missing_username_cookie_is_rejected() {
    let (addr, handle) = start_server().await;
    let code = open_lobby(&handle, 2).await;

    let mut ws = connect(&addr, &format!("/lobby/ws?lobby-id={code}"), None).await;
    expect_frame(&mut ws, "rejected").await;
    assert!(next_frame(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_wrong_path_is_rejected() {
    let (addr, handle) = start_server().await;
    let code = open_lobby(&handle, 2).await;

    let mut ws = connect(&addr, &format!("/chat?lobby-id={code}"), Some("alice")).await;
    expect_frame(&mut ws, "rejected").await;
}

#[tokio::test]
async fn test_full_lobby_rejects_newcomer() {
    let (addr, handle) = start_server().await;
    let code = open_lobby(&handle, 2).await;
    let _alice = join(&addr, &code, "alice").await;
    let _bob = join(&addr, &code, "bob").await;

    let mut carol = connect(&addr, &format!("/lobby/ws?lobby-id={code}"), Some("carol")).await;
    expect_frame(&mut carol, "rejected").await;
    assert!(next_frame(&mut carol).await.is_none());

    let info = handle.lookup_lobby(&code).await.unwrap();
    let names: Vec<&str> = info.players.iter().map(|p| p.username.as_str()).collect();
    assert_eq!(names, ["alice", "bob"]);
}

#[tokio::test]
async fn test_disconnect_is_announced_as_left() {
    let (addr, handle) = start_server().await;
    let code = open_lobby(&handle, 2).await;
    let mut alice = join(&addr, &code, "alice").await;
    let mut bob = join(&addr, &code, "bob").await;
    expect_frame(&mut alice, "join_lobby").await;

    bob.close(None).await.expect("close should succeed");
    let left = expect_frame(&mut alice, "left").await;
    assert_eq!(left["sender"], "bob");
    assert_eq!(left["connected_users"], serde_json::json!(["alice"]));
}

#[tokio::test]
async fn test_close_lobby_ends_sessions() {
    let (addr, handle) = start_server().await;
    let code = open_lobby(&handle, 2).await;
    let mut alice = join(&addr, &code, "alice").await;

    handle.close_lobby(&code).await.unwrap();
    expect_frame(&mut alice, "lobby_closed").await;
    assert!(next_frame(&mut alice).await.is_none());

    assert!(handle.lobby_codes().await.is_empty());
    assert!(matches!(
        handle.lookup_lobby(&code).await,
        Err(SequenceError::Lobby(LobbyError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_create_lobby_validates_settings() {
    let (_addr, handle) = start_server().await;

    let err = handle
        .create_lobby(
            Settings {
                num_of_players: 1,
                ..Settings::default()
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SequenceError::Lobby(LobbyError::InvalidSettings(_))
    ));

    let code = LobbyCode::parse("PLAY").unwrap();
    handle
        .create_lobby(Settings::default(), Some(code.clone()))
        .await
        .unwrap();
    assert!(matches!(
        handle.create_lobby(Settings::default(), Some(code.clone())).await,
        Err(SequenceError::Lobby(LobbyError::AlreadyExists(_)))
    ));
    assert_eq!(handle.lobby_codes().await, vec![code]);
}
