//! The `GameEngine` trait: what a lobby hands its players to once
//! everyone is ready.
//!
//! Card and board rules live outside this crate. The lobby only needs a
//! way to start a game from its settings and its ready roster; the value
//! it gets back is opaque to it.

use sequence_protocol::{PlayerSnapshot, Settings};

/// Starts games for lobbies that reach the ready threshold.
///
/// Called exactly once per lobby, on the transition to `InGame`.
/// `players` is the connected roster in name order, each with a color.
pub trait GameEngine: Send + Sync + 'static {
    /// The running game. The lobby keeps it for as long as it runs.
    type Game: Send + 'static;

    fn start(settings: &Settings, players: &[PlayerSnapshot]) -> Self::Game;
}
