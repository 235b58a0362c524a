//! Error types for the protocol layer.
//!
//! Each crate in the workspace defines its own error enum. A
//! `ProtocolError` always means the bytes or the values were wrong, never
//! that the network or the store failed.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, a missing `action`, or an action
    /// name the server does not know.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The value decoded fine but breaks a protocol rule, e.g. a lobby
    /// code with five characters or a seat count larger than the palette.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
