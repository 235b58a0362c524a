//! Session types: the data a live connection carries around.
//!
//! A "session" is one browser tab connected to one lobby. It knows:
//! - WHO is connected (`Username`, from the cookie)
//! - WHERE they are (`LobbyCode`, from the `lobby-id` query parameter)
//! - WHAT they last held, in a local mirror of their color and ready flag
//!
//! The mirror is never authoritative. The lobby owns the real state; the
//! session only uses its copy to skip requests that would change nothing.

use std::time::Duration;

use sequence_protocol::{Color, LobbyCode, Payload, PayloadAction, PlayerSnapshot, Username};
use sequence_transport::{ConnectRequest, ConnectionId, ConnectionLimits};

use crate::{Authenticator, SessionError};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Keepalive timing and limits for sessions.
///
/// The defaults reclaim a half-open connection within about a minute: the
/// server pings every `ping_period`, and a peer that has not answered
/// within `pong_wait` times out on its next read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Longest silence tolerated from the browser. Default: 60 seconds.
    pub pong_wait: Duration,

    /// How often the server pings the browser. Default: 54 seconds.
    pub ping_period: Duration,

    /// Longest time a single write may take. Default: 10 seconds.
    pub write_wait: Duration,

    /// Largest inbound frame, in bytes. Default: 512.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            write_wait: Duration::from_secs(10),
            max_message_size: 512,
        }
    }
}

impl SessionConfig {
    /// Returns a copy where `ping_period` is shorter than `pong_wait`.
    ///
    /// A ping period at or above the pong wait would let a healthy peer
    /// time out between pings, so it is clamped to 9/10 of the wait.
    pub fn validated(&self) -> Self {
        let mut config = self.clone();
        if config.pong_wait.is_zero() {
            config.pong_wait = Self::default().pong_wait;
        }
        if config.ping_period.is_zero() || config.ping_period >= config.pong_wait {
            config.ping_period = (config.pong_wait * 9 / 10).max(Duration::from_millis(1));
        }
        config
    }

    /// The transport limits that enforce this config.
    pub fn limits(&self) -> ConnectionLimits {
        let config = self.validated();
        ConnectionLimits {
            read_timeout: config.pong_wait,
            write_timeout: config.write_wait,
            max_message_size: config.max_message_size,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Identity of one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Display name of the browser.
    pub username: Username,

    /// The lobby the connection joined.
    pub lobby: LobbyCode,

    /// The underlying transport connection.
    pub connection: ConnectionId,
}

impl Session {
    /// The query parameter carrying the lobby code.
    pub const LOBBY_PARAM: &'static str = "lobby-id";

    /// Resolves who is connecting to which lobby.
    ///
    /// # Errors
    /// - [`SessionError::AuthFailed`] when `auth` rejects the request.
    /// - [`SessionError::MissingLobbyCode`] without a `lobby-id` parameter.
    /// - [`SessionError::Protocol`] when the code is malformed.
    pub async fn identify<A: Authenticator>(
        auth: &A,
        request: &ConnectRequest,
        connection: ConnectionId,
    ) -> Result<Self, SessionError> {
        let username = auth.authenticate(request).await?;
        let raw = request
            .query(Self::LOBBY_PARAM)
            .ok_or(SessionError::MissingLobbyCode)?;
        let lobby = LobbyCode::parse(raw)?;
        Ok(Self {
            username,
            lobby,
            connection,
        })
    }
}

// ---------------------------------------------------------------------------
// LocalState
// ---------------------------------------------------------------------------

/// The session's mirror of its player's color and ready flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalState {
    pub color: Option<Color>,
    pub ready: bool,
}

impl LocalState {
    /// Copies color and ready from a snapshot of this session's player.
    pub fn observe(&mut self, player: &PlayerSnapshot) {
        self.color = player.color;
        self.ready = player.ready;
    }

    /// Whether `payload` would leave the player unchanged, so there is no
    /// point publishing it.
    pub fn is_redundant(&self, payload: &Payload) -> bool {
        match payload.action {
            PayloadAction::ChooseColor => match payload.message.parse::<Color>() {
                Ok(color) => self.color == Some(color),
                Err(_) => false,
            },
            PayloadAction::SetReadyStatus => self.ready,
            PayloadAction::JoinLobby | PayloadAction::ChatMessage | PayloadAction::LeftLobby => {
                false
            }
        }
    }
}
