//! Unified error type for Mailroom, plus the errors of protected API calls.

use mailroom_protocol::ProtocolError;
use mailroom_session::SessionError;
use mailroom_transport::TransportError;

/// Outcome of a protected API call that did not succeed.
///
/// Maps one-to-one onto what the UI has to show: a re-login prompt, a
/// connectivity banner, or the server's own message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The access token was rejected and could not be renewed. The session
    /// has been purged and the tab sent to sign-in.
    #[error("session expired, please sign in again")]
    SessionExpired,

    /// The request was rejected again after a successful refresh. It is
    /// not retried a second time.
    #[error("not authorized")]
    Unauthorized,

    /// No response at all. Session state is untouched.
    #[error("network error: {0}")]
    Connectivity(String),

    /// Any other non-success status.
    #[error("request failed ({status}): {message}")]
    Status { status: u16, message: String },

    /// The response body was not what the caller asked for.
    #[error("unexpected response body: {0}")]
    Decode(String),

    /// The request could not be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attributes let `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum MailroomError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// Sign-in or sign-up failed. `message` is ready to show to the user.
    #[error("{message}")]
    Auth {
        message: String,
        #[source]
        source: SessionError,
    },

    /// The OAuth redirect did not carry a usable session.
    #[error("OAuth callback failed: {0}")]
    OAuthCallback(String),

    /// The HTTP client could not be built from the configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MailroomError {
    /// Wraps an auth endpoint failure with a user-facing message: the
    /// server's own wording when it sent one, `fallback` otherwise.
    pub(crate) fn auth(source: SessionError, fallback: &str) -> Self {
        let message = match &source {
            SessionError::Rejected { message, .. } if !message.is_empty() => {
                message.clone()
            }
            SessionError::Unreachable(reason) if !reason.is_empty() => {
                reason.clone()
            }
            _ => fallback.to_string(),
        };
        Self::Auth { message, source }
    }
}

/// Extracts a user-facing message from an error response body.
///
/// In order: a JSON string body, its `message` field, its `error` field,
/// any non-empty plain-text body, and finally `fallback`.
pub fn error_message(body: &str, fallback: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return fallback.to_string();
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::String(text)) if !text.is_empty() => text,
        Ok(serde_json::Value::Object(map)) => ["message", "error"]
            .iter()
            .filter_map(|field| map.get(*field))
            .find_map(|value| match value {
                serde_json::Value::Null => None,
                serde_json::Value::String(text) if text.is_empty() => None,
                serde_json::Value::String(text) => Some(text.clone()),
                other => Some(other.to_string()),
            })
            .unwrap_or_else(|| fallback.to_string()),
        Ok(_) => fallback.to_string(),
        Err(_) => body.to_string(),
    }
}
