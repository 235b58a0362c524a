//! Store topic and key naming.
//!
//! Sessions and the lobby never talk to each other directly. Each lobby
//! owns five topics in the shared store, and both sides derive the names
//! from the lobby code with the helpers here.

use crate::{LobbyCode, Username};

/// One of the five per-lobby topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LobbyChannel {
    /// Sessions announce themselves when they start.
    Register,
    /// Sessions announce themselves when they end.
    Deregister,
    /// Sessions forward browser payloads.
    Payload,
    /// The lobby publishes responses for sessions to deliver.
    Response,
    /// The lobby publishes state transitions.
    State,
}

impl LobbyChannel {
    /// Topics the lobby consumes.
    pub const INBOUND: [LobbyChannel; 3] = [
        LobbyChannel::Register,
        LobbyChannel::Deregister,
        LobbyChannel::Payload,
    ];

    /// Topics every session consumes.
    pub const OUTBOUND: [LobbyChannel; 2] = [LobbyChannel::Response, LobbyChannel::State];

    const fn suffix(self) -> &'static str {
        match self {
            LobbyChannel::Register => "registerChannel",
            LobbyChannel::Deregister => "deregisterChannel",
            LobbyChannel::Payload => "payloadChannel",
            LobbyChannel::Response => "responseChannel",
            LobbyChannel::State => "stateChannel",
        }
    }

    /// The topic name, e.g. `lobby.ABCD.registerChannel`.
    pub fn topic(self, code: &LobbyCode) -> String {
        format!("lobby.{code}.{}", self.suffix())
    }

    /// Topic names for several channels of one lobby.
    pub fn topics(channels: &[LobbyChannel], code: &LobbyCode) -> Vec<String> {
        channels.iter().map(|c| c.topic(code)).collect()
    }

    /// Splits a topic name back into its lobby code and channel.
    pub fn from_topic(topic: &str) -> Option<(LobbyCode, LobbyChannel)> {
        let rest = topic.strip_prefix("lobby.")?;
        let (code, suffix) = rest.split_once('.')?;
        let channel = match suffix {
            "registerChannel" => LobbyChannel::Register,
            "deregisterChannel" => LobbyChannel::Deregister,
            "payloadChannel" => LobbyChannel::Payload,
            "responseChannel" => LobbyChannel::Response,
            "stateChannel" => LobbyChannel::State,
            _ => return None,
        };
        Some((LobbyCode::parse(code).ok()?, channel))
    }
}

/// Store key of a [`LobbySnapshot`](crate::LobbySnapshot).
pub fn lobby_key(code: &LobbyCode) -> String {
    format!("lobby_id-{code}.gamestate")
}

/// Store key of a [`PlayerSnapshot`](crate::PlayerSnapshot).
pub fn player_key(code: &LobbyCode, username: &Username) -> String {
    format!("lobby_id-{code}|username-{username}.gamestate")
}
