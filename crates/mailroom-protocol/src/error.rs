//! Error types for the protocol layer.
//!
//! Each Mailroom crate defines its own error enum, so a `ProtocolError`
//! always means "the bytes or the message shape were wrong", never a
//! network or storage problem.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, a missing field, or an
    /// unknown `type` tag.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded but breaks a protocol rule, e.g. a `LOGIN`
    /// carrying an empty access token.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
