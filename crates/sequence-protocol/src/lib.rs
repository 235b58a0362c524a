//! Wire protocol for the Sequence lobby.
//!
//! This crate defines the "language" spoken between browsers, sessions
//! and lobbies:
//!
//! - **Types** ([`Payload`], [`Response`], [`LobbySnapshot`], etc.): the
//!   messages and records that get serialized.
//! - **Channels** ([`LobbyChannel`], [`lobby_key`], [`player_key`]): the
//!   topic and key names each lobby uses in the shared store.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those values are
//!   converted to and from bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets or the store. It only
//! knows what the bytes mean.
//!
//! ```text
//! browser ─Payload─▶ session ─SessionEnvelope─▶ store ─▶ lobby
//! browser ◀─ClientMessage─ session ◀─Response─ store ◀─ lobby
//! ```

mod channel;
mod codec;
mod error;
mod types;

pub use channel::{LobbyChannel, lobby_key, player_key};
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ClientMessage, Color, CurrentState, LobbyCode, LobbySnapshot, Payload, PayloadAction,
    PlayerSnapshot, Presence, Recipient, Response, ResponseAction, SessionEnvelope, Settings,
    StateChange, Username,
};
