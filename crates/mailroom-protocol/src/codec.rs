//! Codec trait and implementations for serializing/deserializing messages.
//!
//! The session layer never calls `serde_json` directly. It holds something
//! that implements [`Codec`], so the cross-tab format can change without
//! touching the sync logic.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust values to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a codec lives inside long-running
/// listener tasks that Tokio may move between worker threads.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is what browser tabs already exchange over `BroadcastChannel` and
/// storage events, so a Rust tab and a browser tab of the same origin can
/// read each other's messages.
///
/// ## Example
///
/// ```rust
/// use mailroom_protocol::{Codec, JsonCodec, SyncMessage};
///
/// let codec = JsonCodec;
/// let msg = SyncMessage::TokenRefresh { access_token: "a.b.c".into() };
///
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded: SyncMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::SyncMessage;

    #[test]
    fn test_decode_garbage_returns_decode_error() {
        let result: Result<SyncMessage, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_unknown_tag_returns_decode_error() {
        // A future message type from a newer tab must not be mistaken
        // for one we know.
        let result: Result<SyncMessage, _> =
            JsonCodec.decode(br#"{"type":"PROFILE_UPDATED"}"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_accepts_browser_payload() {
        let msg: SyncMessage = JsonCodec
            .decode(br#"{"type":"LOGIN","accessToken":"x.y.z"}"#)
            .expect("browser shape should decode");
        assert_eq!(
            msg,
            SyncMessage::Login {
                access_token: "x.y.z".into()
            }
        );
    }
}
