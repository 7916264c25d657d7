//! Error types for the session layer.

use mailroom_protocol::ProtocolError;
use mailroom_transport::TransportError;

/// Errors that can occur while talking to the auth backend or moving
/// session state around.
///
/// Most session operations do not surface errors at all: a failed refresh
/// purges the session and resolves to `None`, a malformed token has no
/// claims. These variants are what the [`AuthApi`](crate::AuthApi) seam
/// and the cross-tab plumbing report.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The auth server answered, but not with success.
    ///
    /// `message` is the server's own wording when it sent one.
    #[error("auth request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// No response at all: DNS, TCP, TLS, or timeout.
    #[error("auth server unreachable: {0}")]
    Unreachable(String),

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The tab's channel or storage refused an operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// The HTTP status, for rejections.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}
