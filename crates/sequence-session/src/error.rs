//! Error types for the session layer.

use sequence_protocol::ProtocolError;
use sequence_store::StoreError;
use sequence_transport::TransportError;

/// Errors that end a session or keep it from starting.
///
/// The transport, protocol and store variants wrap the lower layers'
/// errors, so `?` works across the layers a session touches.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The connecting browser could not be identified, e.g. the
    /// `username` cookie is missing or not a valid display name.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The upgrade request carried no `lobby-id` query parameter.
    #[error("no lobby code in request")]
    MissingLobbyCode,

    /// Reading from or writing to the socket failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An inbound frame did not decode, or an outbound one did not encode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The store refused a publish or dropped the subscription.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// One of the session's tasks panicked.
    #[error("session task failed: {0}")]
    TaskFailed(String),
}
