//! Session loops driven through a scripted connection and a real
//! in-memory store. The test plays the lobby: it watches the inbound
//! topics and publishes responses itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use sequence_protocol::{
    Codec, Color, CurrentState, JsonCodec, LobbyChannel, LobbyCode, PayloadAction, PlayerSnapshot,
    Presence, Recipient, Response, ResponseAction, SessionEnvelope, StateChange, Username,
};
use sequence_session::{Session, SessionConfig, SessionEnd, SessionError, run_session};
use sequence_store::{MemoryStore, MemorySubscription, StateStore, TopicSubscription};
use sequence_transport::{ConnectRequest, Connection, ConnectionId, TransportError};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

// =========================================================================
// Scripted connection
// =========================================================================

/// A connection whose inbound frames come from the test and whose
/// outbound frames go back to it.
struct ScriptedConnection {
    id: ConnectionId,
    request: ConnectRequest,
    inbound: Mutex<mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    pings: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Connection for ScriptedConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.outbound
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed("peer gone".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.inbound.lock().await.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn request(&self) -> &ConnectRequest {
        &self.request
    }
}

/// The test's end of a scripted connection.
struct Browser {
    to_server: Option<mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>>,
    from_server: mpsc::UnboundedReceiver<Vec<u8>>,
    pings: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Browser {
    fn send(&self, json: &str) {
        if let Some(tx) = &self.to_server {
            tx.send(Ok(json.as_bytes().to_vec())).unwrap();
        }
    }

    fn fail(&self, error: TransportError) {
        if let Some(tx) = &self.to_server {
            tx.send(Err(error)).unwrap();
        }
    }

    fn hang_up(&mut self) {
        self.to_server = None;
    }

    async fn frame(&mut self) -> Value {
        let bytes = tokio::time::timeout(Duration::from_secs(2), self.from_server.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("session dropped the connection");
        serde_json::from_slice(&bytes).unwrap()
    }
}

fn scripted() -> (ScriptedConnection, Browser) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let pings = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let conn = ScriptedConnection {
        id: ConnectionId::new(1),
        request: ConnectRequest::new("/lobby/ws"),
        inbound: Mutex::new(in_rx),
        outbound: out_tx,
        pings: Arc::clone(&pings),
        closed: Arc::clone(&closed),
    };
    let browser = Browser {
        to_server: Some(in_tx),
        from_server: out_rx,
        pings,
        closed,
    };
    (conn, browser)
}

// =========================================================================
// Helpers
// =========================================================================

fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}

fn code() -> LobbyCode {
    LobbyCode::parse("ABCD").unwrap()
}

struct Harness {
    store: MemoryStore,
    lobby_side: MemorySubscription,
    browser: Browser,
    task: JoinHandle<Result<SessionEnd, SessionError>>,
}

/// Starts alice's session in lobby ABCD and waits for its registration.
async fn start(config: SessionConfig) -> Harness {
    let store = MemoryStore::new();
    let mut lobby_side = store
        .subscribe(&LobbyChannel::topics(&LobbyChannel::INBOUND, &code()))
        .await
        .unwrap();
    let (conn, browser) = scripted();
    let session = Session {
        username: user("alice"),
        lobby: code(),
        connection: conn.id(),
    };
    let task = tokio::spawn({
        let store = store.clone();
        async move { run_session(conn, store, session, &config).await }
    });

    let msg = next_inbound(&mut lobby_side).await;
    assert_eq!(msg.0, LobbyChannel::Register);
    let presence: Presence = JsonCodec.decode(&msg.1).unwrap();
    assert_eq!(presence.username, user("alice"));

    Harness {
        store,
        lobby_side,
        browser,
        task,
    }
}

async fn next_inbound(sub: &mut MemorySubscription) -> (LobbyChannel, Vec<u8>) {
    let msg = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("timed out waiting for session output")
        .expect("subscription closed");
    let (_, channel) = LobbyChannel::from_topic(&msg.topic).unwrap();
    (channel, msg.payload)
}

async fn next_envelope(sub: &mut MemorySubscription) -> SessionEnvelope {
    let (channel, bytes) = next_inbound(sub).await;
    assert_eq!(channel, LobbyChannel::Payload);
    JsonCodec.decode(&bytes).unwrap()
}

async fn respond(store: &MemoryStore, response: &Response) {
    let bytes = JsonCodec.encode(response).unwrap();
    store
        .publish(&LobbyChannel::Response.topic(&code()), bytes)
        .await
        .unwrap();
}

async fn finish(task: JoinHandle<Result<SessionEnd, SessionError>>) -> Result<SessionEnd, SessionError> {
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("session did not end")
        .expect("session task panicked")
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_payloads_are_published_with_identity() {
    let mut h = start(SessionConfig::default()).await;

    h.browser
        .send(r#"{"action":"chat_message","message":"hello"}"#);
    let envelope = next_envelope(&mut h.lobby_side).await;
    assert_eq!(envelope.username, user("alice"));
    assert_eq!(envelope.payload.action, PayloadAction::ChatMessage);
    assert_eq!(envelope.payload.message, "hello");

    h.browser
        .send(r#"{"action":"new_chat_message","message":"again"}"#);
    let envelope = next_envelope(&mut h.lobby_side).await;
    assert_eq!(envelope.payload.action, PayloadAction::ChatMessage);
}

#[tokio::test]
async fn test_responses_follow_recipient() {
    let mut h = start(SessionConfig::default()).await;

    respond(
        &h.store,
        &Response::new(ResponseAction::NewChatMessage, Recipient::All)
            .with_sender(user("bob"))
            .with_message("hi all"),
    )
    .await;
    respond(
        &h.store,
        &Response::new(ResponseAction::JoinLobby, Recipient::AllExcept(user("alice"))),
    )
    .await;
    respond(
        &h.store,
        &Response::new(ResponseAction::Notice, Recipient::Only(user("bob"))),
    )
    .await;
    respond(
        &h.store,
        &Response::new(ResponseAction::Notice, Recipient::Only(user("alice")))
            .with_message("for alice"),
    )
    .await;

    let frame = h.browser.frame().await;
    assert_eq!(frame["action"], "new_chat_message");
    assert_eq!(frame["message"], "hi all");
    assert_eq!(frame["sender"], "bob");

    let frame = h.browser.frame().await;
    assert_eq!(frame["action"], "notice");
    assert_eq!(frame["message"], "for alice");
}

#[tokio::test]
async fn test_state_change_is_forwarded() {
    let mut h = start(SessionConfig::default()).await;

    let change = StateChange {
        lobby_id: code(),
        state: CurrentState::InGame,
    };
    h.store
        .publish(
            &LobbyChannel::State.topic(&code()),
            JsonCodec.encode(&change).unwrap(),
        )
        .await
        .unwrap();

    let frame = h.browser.frame().await;
    assert_eq!(frame["action"], "change_state");
    assert_eq!(frame["message"], "game");
}

#[tokio::test]
async fn test_redundant_requests_are_not_published() {
    let mut h = start(SessionConfig::default()).await;

    let mut alice = PlayerSnapshot::new(code(), user("alice"));
    alice.color = Some(Color::Red);
    alice.ready = true;
    respond(
        &h.store,
        &Response::new(ResponseAction::SetReadyStatus, Recipient::All).with_player(alice),
    )
    .await;
    assert_eq!(h.browser.frame().await["action"], "set_ready_status");

    h.browser
        .send(r#"{"action":"choose_color","message":"red"}"#);
    h.browser.send(r#"{"action":"set_ready_status"}"#);
    h.browser
        .send(r#"{"action":"choose_color","message":"blue"}"#);

    let envelope = next_envelope(&mut h.lobby_side).await;
    assert_eq!(envelope.payload.action, PayloadAction::ChooseColor);
    assert_eq!(envelope.payload.message, "blue");
}

#[tokio::test]
async fn test_lobby_restart_makes_session_register_again() {
    let mut h = start(SessionConfig::default()).await;

    let mut alice = PlayerSnapshot::new(code(), user("alice"));
    alice.color = Some(Color::Red);
    alice.ready = true;
    respond(
        &h.store,
        &Response::new(ResponseAction::SetReadyStatus, Recipient::All).with_player(alice),
    )
    .await;
    assert_eq!(h.browser.frame().await["action"], "set_ready_status");

    respond(
        &h.store,
        &Response::new(ResponseAction::LobbyRestarted, Recipient::All),
    )
    .await;
    let (channel, bytes) = next_inbound(&mut h.lobby_side).await;
    assert_eq!(channel, LobbyChannel::Register);
    let presence: Presence = JsonCodec.decode(&bytes).unwrap();
    assert_eq!(presence.username, user("alice"));

    // The restart itself never reaches the browser.
    respond(
        &h.store,
        &Response::new(ResponseAction::NewChatMessage, Recipient::All).with_message("after"),
    )
    .await;
    assert_eq!(h.browser.frame().await["action"], "new_chat_message");

    // The local mirror was reset, so ready is published again.
    h.browser.send(r#"{"action":"set_ready_status"}"#);
    let envelope = next_envelope(&mut h.lobby_side).await;
    assert_eq!(envelope.payload.action, PayloadAction::SetReadyStatus);
}

#[tokio::test]
async fn test_rejection_ends_session_and_deregisters() {
    let mut h = start(SessionConfig::default()).await;

    respond(
        &h.store,
        &Response::new(ResponseAction::Rejected, Recipient::Only(user("alice")))
            .with_message("the lobby is full"),
    )
    .await;

    assert_eq!(h.browser.frame().await["action"], "rejected");
    let end = finish(h.task).await.unwrap();
    assert_eq!(end, SessionEnd::Rejected("the lobby is full".into()));

    let (channel, bytes) = next_inbound(&mut h.lobby_side).await;
    assert_eq!(channel, LobbyChannel::Deregister);
    let presence: Presence = JsonCodec.decode(&bytes).unwrap();
    assert_eq!(presence.username, user("alice"));
    assert!(h.browser.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_lobby_closed_ends_session() {
    let mut h = start(SessionConfig::default()).await;

    respond(
        &h.store,
        &Response::new(ResponseAction::LobbyClosed, Recipient::All),
    )
    .await;

    assert_eq!(h.browser.frame().await["action"], "lobby_closed");
    assert_eq!(finish(h.task).await.unwrap(), SessionEnd::LobbyClosed);
}

#[tokio::test]
async fn test_browser_hang_up_deregisters() {
    let mut h = start(SessionConfig::default()).await;

    h.browser.hang_up();
    assert_eq!(finish(h.task).await.unwrap(), SessionEnd::Closed);
    let (channel, _) = next_inbound(&mut h.lobby_side).await;
    assert_eq!(channel, LobbyChannel::Deregister);
}

#[tokio::test]
async fn test_left_lobby_is_published_then_ends_session() {
    let mut h = start(SessionConfig::default()).await;

    h.browser.send(r#"{"action":"left_lobby"}"#);
    let envelope = next_envelope(&mut h.lobby_side).await;
    assert_eq!(envelope.payload.action, PayloadAction::LeftLobby);
    assert_eq!(finish(h.task).await.unwrap(), SessionEnd::Left);
}

#[tokio::test]
async fn test_malformed_frame_ends_session() {
    let mut h = start(SessionConfig::default()).await;

    h.browser.send(r#"{"action":"dance"}"#);
    assert!(matches!(
        finish(h.task).await,
        Err(SessionError::Protocol(_))
    ));
    let (channel, _) = next_inbound(&mut h.lobby_side).await;
    assert_eq!(channel, LobbyChannel::Deregister);
}

#[tokio::test]
async fn test_transport_error_ends_session() {
    let h = start(SessionConfig::default()).await;

    h.browser.fail(TransportError::TimedOut);
    assert!(matches!(
        finish(h.task).await,
        Err(SessionError::Transport(TransportError::TimedOut))
    ));
}

#[tokio::test]
async fn test_store_shutdown_detaches_session() {
    let h = start(SessionConfig::default()).await;

    h.store.shutdown();
    assert_eq!(finish(h.task).await.unwrap(), SessionEnd::Detached);
}

#[tokio::test(start_paused = true)]
async fn test_response_loop_pings_on_period() {
    let config = SessionConfig {
        pong_wait: Duration::from_secs(10),
        ping_period: Duration::from_secs(5),
        ..SessionConfig::default()
    };
    let h = start(config).await;

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(h.browser.pings.load(Ordering::SeqCst), 3);
    assert!(!h.task.is_finished());
}
