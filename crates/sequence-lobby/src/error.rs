//! Error types for the lobby layer.

use sequence_protocol::{LobbyCode, ProtocolError};
use sequence_store::StoreError;

/// Errors that can occur during lobby operations.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// No lobby with this code is running or stored.
    #[error("lobby {0} not found")]
    NotFound(LobbyCode),

    /// A lobby with this code already exists.
    #[error("lobby {0} already exists")]
    AlreadyExists(LobbyCode),

    /// The settings given at creation are out of range.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// No free code was found within the configured number of attempts.
    #[error("no free lobby code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },

    /// The lobby's task has stopped or its control channel is full.
    #[error("lobby {0} is unavailable")]
    Unavailable(LobbyCode),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
