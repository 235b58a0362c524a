//! The loops that drive a live session.
//!
//! Each session runs two Tokio tasks over one shared connection:
//!
//! ```text
//!            ┌──────────── read loop ────────────┐
//! browser ──▶│ recv → decode Payload → publish   │──▶ lobby.{code}.payloadChannel
//!            └───────────────────────────────────┘
//!            ┌────────── response loop ──────────┐
//! browser ◀──│ filter by Recipient → encode      │◀── lobby.{code}.responseChannel
//!            │ ping ticker                       │◀── lobby.{code}.stateChannel
//!            └───────────────────────────────────┘
//! ```
//!
//! When either task ends the other is aborted, a deregister is published
//! for the lobby, and the connection is closed. If the lobby's task is
//! restarted underneath a session, the response loop registers again.

use std::sync::Arc;
use std::time::Duration;

use sequence_protocol::{
    ClientMessage, Codec, JsonCodec, LobbyChannel, Payload, PayloadAction, Presence, Response,
    ResponseAction, SessionEnvelope, StateChange,
};
use sequence_store::{StateStore, StoreMessage, TopicSubscription};
use sequence_transport::{Connection, TransportError};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{LocalState, Session, SessionConfig, SessionError};

/// Why a session ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The browser closed the connection.
    Closed,
    /// The browser announced it left the lobby.
    Left,
    /// The lobby turned this session away; carries the reason.
    Rejected(String),
    /// The lobby was closed.
    LobbyClosed,
    /// The store dropped the session's subscription.
    Detached,
}

/// Runs a session until the browser leaves, the lobby ends it, or the
/// connection fails.
///
/// The session subscribes to its lobby's outbound topics before it
/// registers, so it cannot miss the lobby's answer to the registration.
///
/// # Errors
/// Transport errors (including read and write deadlines) and undecodable
/// frames end the session with an error. A deregister is published and
/// the connection closed either way.
pub async fn run_session<C, S>(
    conn: C,
    store: S,
    session: Session,
    config: &SessionConfig,
) -> Result<SessionEnd, SessionError>
where
    C: Connection<Error = TransportError>,
    S: StateStore,
{
    let config = config.validated();
    let conn = Arc::new(conn);
    let code = session.lobby.clone();

    let topics = LobbyChannel::topics(&LobbyChannel::OUTBOUND, &code);
    let subscription = store.subscribe(&topics).await?;
    publish_presence(&store, LobbyChannel::Register, &session).await?;
    tracing::info!(
        lobby = %code,
        username = %session.username,
        conn_id = %session.connection,
        "session registered"
    );

    let (mirror_tx, mirror_rx) = watch::channel(LocalState::default());
    let mut reader = tokio::spawn(read_loop(
        Arc::clone(&conn),
        store.clone(),
        session.clone(),
        mirror_rx,
    ));
    let mut responder = tokio::spawn(response_loop(
        Arc::clone(&conn),
        store.clone(),
        subscription,
        session.clone(),
        mirror_tx,
        config.ping_period,
    ));

    let joined = tokio::select! {
        res = &mut reader => {
            responder.abort();
            res
        }
        res = &mut responder => {
            reader.abort();
            res
        }
    };
    let outcome = joined.unwrap_or_else(|e| Err(SessionError::TaskFailed(e.to_string())));

    if let Err(e) = publish_presence(&store, LobbyChannel::Deregister, &session).await {
        tracing::warn!(lobby = %code, username = %session.username, error = %e, "failed to deregister");
    }
    if let Err(e) = conn.close().await {
        tracing::debug!(conn_id = %session.connection, error = %e, "close failed");
    }

    match &outcome {
        Ok(end) => {
            tracing::info!(lobby = %code, username = %session.username, ?end, "session ended");
        }
        Err(e) => {
            tracing::info!(lobby = %code, username = %session.username, error = %e, "session ended with error");
        }
    }
    outcome
}

async fn publish_presence<S: StateStore>(
    store: &S,
    channel: LobbyChannel,
    session: &Session,
) -> Result<(), SessionError> {
    let presence = Presence {
        username: session.username.clone(),
    };
    let bytes = JsonCodec.encode(&presence)?;
    store.publish(&channel.topic(&session.lobby), bytes).await?;
    Ok(())
}

/// Reads browser frames and publishes them to the lobby.
async fn read_loop<C, S>(
    conn: Arc<C>,
    store: S,
    session: Session,
    mirror: watch::Receiver<LocalState>,
) -> Result<SessionEnd, SessionError>
where
    C: Connection<Error = TransportError>,
    S: StateStore,
{
    let codec = JsonCodec;
    let topic = LobbyChannel::Payload.topic(&session.lobby);

    loop {
        let Some(data) = conn.recv().await? else {
            return Ok(SessionEnd::Closed);
        };
        let payload: Payload = codec.decode(&data)?;

        let redundant = mirror.borrow().is_redundant(&payload);
        if redundant {
            tracing::debug!(username = %session.username, action = ?payload.action, "no-op request skipped");
            continue;
        }

        let left = matches!(payload.action, PayloadAction::LeftLobby);
        let envelope = SessionEnvelope {
            username: session.username.clone(),
            payload,
        };
        match codec.encode(&envelope) {
            Ok(bytes) => {
                if let Err(e) = store.publish(&topic, bytes).await {
                    tracing::warn!(lobby = %session.lobby, username = %session.username, error = %e, "publish failed");
                }
            }
            Err(e) => {
                tracing::warn!(username = %session.username, error = %e, "failed to encode payload");
            }
        }

        if left {
            return Ok(SessionEnd::Left);
        }
    }
}

/// Forwards lobby output to the browser and keeps the connection alive.
async fn response_loop<C, S, T>(
    conn: Arc<C>,
    store: S,
    mut subscription: T,
    session: Session,
    mirror: watch::Sender<LocalState>,
    ping_period: Duration,
) -> Result<SessionEnd, SessionError>
where
    C: Connection<Error = TransportError>,
    S: StateStore,
    T: TopicSubscription,
{
    let codec = JsonCodec;
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = subscription.recv() => {
                let Some(msg) = msg else {
                    return Ok(SessionEnd::Detached);
                };
                if let Some(end) = deliver(conn.as_ref(), &store, &codec, &session, &mirror, msg).await? {
                    return Ok(end);
                }
            }
            _ = ticker.tick() => {
                conn.ping().await?;
                subscription.ping().await?;
            }
        }
    }
}

/// Sends one store message to the browser if it is meant for this
/// session. Returns the reason to stop, if the message ends the session.
async fn deliver<C, S>(
    conn: &C,
    store: &S,
    codec: &JsonCodec,
    session: &Session,
    mirror: &watch::Sender<LocalState>,
    msg: StoreMessage,
) -> Result<Option<SessionEnd>, SessionError>
where
    C: Connection<Error = TransportError>,
    S: StateStore,
{
    match LobbyChannel::from_topic(&msg.topic) {
        Some((_, LobbyChannel::Response)) => {
            let response: Response = match codec.decode(&msg.payload) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(topic = %msg.topic, error = %e, "malformed response, skipping");
                    return Ok(None);
                }
            };
            if !response.recipient.delivers_to(&session.username) {
                return Ok(None);
            }
            if response.action == ResponseAction::LobbyRestarted {
                // The restarted lobby holds this player as departed.
                mirror.send_replace(LocalState::default());
                publish_presence(store, LobbyChannel::Register, session).await?;
                tracing::info!(lobby = %session.lobby, username = %session.username, "registered again after lobby restart");
                return Ok(None);
            }
            if let Some(player) = response
                .player
                .as_ref()
                .filter(|p| p.username == session.username)
            {
                mirror.send_modify(|local| local.observe(player));
            }

            let bytes = codec.encode(&response.to_client())?;
            conn.send(&bytes).await?;

            Ok(match response.action {
                ResponseAction::Rejected => Some(SessionEnd::Rejected(response.message)),
                ResponseAction::LobbyClosed => Some(SessionEnd::LobbyClosed),
                _ => None,
            })
        }
        Some((_, LobbyChannel::State)) => {
            let change: StateChange = match codec.decode(&msg.payload) {
                Ok(change) => change,
                Err(e) => {
                    tracing::warn!(topic = %msg.topic, error = %e, "malformed state change, skipping");
                    return Ok(None);
                }
            };
            let bytes = codec.encode(&ClientMessage::state_change(change.state))?;
            conn.send(&bytes).await?;
            Ok(None)
        }
        _ => {
            tracing::debug!(topic = %msg.topic, "ignoring message on unexpected topic");
            Ok(None)
        }
    }
}
