//! Lobby coordination for the Sequence server.
//!
//! Each lobby runs as an isolated Tokio task (actor model) that is the
//! only writer of its roster, colors and state. Sessions reach it through
//! topics in the shared store rather than through handles.
//!
//! # Key types
//!
//! - [`LobbyManager`]: creates, looks up, closes and reaps lobbies
//! - [`LobbyHandle`]: inspect or shut down a running lobby
//! - [`logic`]: the pure transition rules the actor applies
//! - [`LobbyRepo`]: typed snapshot storage and topic publishing
//! - [`GameEngine`]: what a lobby starts once every seat is ready
//! - [`LobbyConfig`]: grace window, keepalive and idle timing

mod config;
mod engine;
mod error;
mod lobby;
pub mod logic;
mod manager;
mod repo;

pub use config::LobbyConfig;
pub use engine::GameEngine;
pub use error::LobbyError;
pub use lobby::{LobbyHandle, LobbyInfo};
pub use manager::LobbyManager;
pub use repo::LobbyRepo;
