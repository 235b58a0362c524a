//! Unified error type for the Sequence server.

use sequence_lobby::LobbyError;
use sequence_protocol::ProtocolError;
use sequence_session::SessionError;
use sequence_store::StoreError;
use sequence_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates `From` impls, so the
/// `?` operator converts layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, bad code or name).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The shared store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A session could not start or ended with an error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A lobby operation failed (not found, already exists, bad settings).
    #[error(transparent)]
    Lobby(#[from] LobbyError),
}
