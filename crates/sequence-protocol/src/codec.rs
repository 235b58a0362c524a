//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The same codec is used for browser frames, store values and the
//! messages that travel over store topics, so there is exactly one place
//! that decides what the bytes look like.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// ## Trait bounds explained
///
/// - `Send + Sync` → safe to share between the session tasks and the
///   lobby task, which may run on any worker thread.
/// - `'static` → the codec owns everything it needs, so it can live
///   inside long-running tasks.
///
/// `DeserializeOwned` (vs plain `Deserialize`) means the decoded value
/// doesn't borrow from the input buffer, which is dropped right after.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// The browser client speaks JSON, and snapshots in the store are JSON
/// documents, so this is the codec the server uses everywhere.
///
/// ## Example
///
/// ```rust
/// use sequence_protocol::{Codec, JsonCodec, Payload, PayloadAction};
///
/// let codec = JsonCodec;
/// let payload: Payload = codec
///     .decode(br#"{"action":"chat_message","message":"hi"}"#)
///     .unwrap();
/// assert_eq!(payload.action, PayloadAction::ChatMessage);
///
/// let bytes = codec.encode(&payload).unwrap();
/// let decoded: Payload = codec.decode(&bytes).unwrap();
/// assert_eq!(payload, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Payload, PayloadAction};

    #[test]
    fn test_json_codec_decodes_browser_payload() {
        let payload: Payload = JsonCodec
            .decode(br#"{"action":"choose_color","message":"red"}"#)
            .unwrap();
        assert_eq!(payload.action, PayloadAction::ChooseColor);
        assert_eq!(payload.message, "red");
    }

    #[test]
    fn test_json_codec_decode_garbage_is_decode_error() {
        let result: Result<Payload, _> = JsonCodec.decode(b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_decode_unknown_action_is_decode_error() {
        let result: Result<Payload, _> =
            JsonCodec.decode(br#"{"action":"fly_to_moon","message":""}"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
