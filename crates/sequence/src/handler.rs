//! Per-connection handler: admission, then the session loops.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Check the endpoint path
//!   2. Identify the browser (cookie) and the lobby (`lobby-id`)
//!   3. Make sure the lobby is running, reviving it if needed
//!   4. Hand the connection to the session loops
//!
//! A connection that fails admission gets one `rejected` frame and is
//! closed.

use std::sync::Arc;

use sequence_lobby::GameEngine;
use sequence_protocol::{ClientMessage, Codec, JsonCodec, ProtocolError};
use sequence_session::{Authenticator, Session, SessionEnd, run_session};
use sequence_store::StateStore;
use sequence_transport::{Connection, WebSocketConnection};

use crate::SequenceError;
use crate::server::{LOBBY_PATH, ServerState};

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, G, A>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S, G, A>>,
) -> Result<SessionEnd, SequenceError>
where
    S: StateStore,
    G: GameEngine,
    A: Authenticator,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, path = conn.request().path(), "handling new connection");

    let session = match admit(&conn, &state).await {
        Ok(session) => session,
        Err(e) => {
            tracing::info!(%conn_id, error = %e, "connection refused");
            reject(&conn, &e.to_string()).await;
            return Err(e);
        }
    };

    let end = run_session(conn, state.store.clone(), session, &state.session_config).await?;
    Ok(end)
}

/// Resolves the session and makes sure its lobby is running.
async fn admit<S, G, A>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<S, G, A>>,
) -> Result<Session, SequenceError>
where
    S: StateStore,
    G: GameEngine,
    A: Authenticator,
{
    let request = conn.request();
    if request.path() != LOBBY_PATH {
        return Err(ProtocolError::InvalidMessage(format!(
            "unknown endpoint {}",
            request.path()
        ))
        .into());
    }

    let session = Session::identify(&state.auth, request, conn.id()).await?;
    // Lock only for the lookup, drop before the session starts.
    state.lobbies.lock().await.lookup(&session.lobby).await?;
    Ok(session)
}

/// Sends a `rejected` frame and closes. Failures are ignored; the peer
/// may already be gone.
async fn reject(conn: &WebSocketConnection, reason: &str) {
    match JsonCodec.encode(&ClientMessage::rejected(reason)) {
        Ok(bytes) => {
            if let Err(e) = conn.send(&bytes).await {
                tracing::debug!(conn_id = %conn.id(), error = %e, "failed to send rejection");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode rejection");
        }
    }
    let _ = conn.close().await;
}
