//! Protocol types: everything that is serialized and leaves the process.
//!
//! Two families live here:
//!
//! - [`SyncMessage`], which travels between tabs of one origin.
//! - The auth API bodies, which travel between a tab and the backend.
//!
//! Field names follow the backend's camelCase JSON; the Rust side keeps
//! snake_case and lets serde do the renaming.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// SyncMessage: cross-tab events
// ---------------------------------------------------------------------------

/// A session event broadcast to the other tabs of the same origin.
///
/// `#[serde(tag = "type")]` with `SCREAMING_SNAKE_CASE` produces the exact
/// JSON the browser client posts:
///
/// ```text
/// { "type": "LOGOUT" }
/// { "type": "LOGIN", "accessToken": "..." }
/// { "type": "TOKEN_REFRESH", "accessToken": "..." }
/// ```
///
/// There is no ordering guarantee across tabs beyond arrival order on one
/// channel; receivers apply last-arrived-wins for the token value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    /// The user signed out (or the session died) in another tab.
    Logout,

    /// The user signed in in another tab.
    Login {
        #[serde(rename = "accessToken")]
        access_token: String,
    },

    /// Another tab renewed the access token.
    TokenRefresh {
        #[serde(rename = "accessToken")]
        access_token: String,
    },
}

impl SyncMessage {
    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Logout => "LOGOUT",
            Self::Login { .. } => "LOGIN",
            Self::TokenRefresh { .. } => "TOKEN_REFRESH",
        }
    }

    /// The access token carried by the message, if any.
    pub fn access_token(&self) -> Option<&str> {
        match self {
            Self::Logout => None,
            Self::Login { access_token }
            | Self::TokenRefresh { access_token } => Some(access_token),
        }
    }

    /// Checks protocol rules that serde can't express.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] when a `LOGIN` or `TOKEN_REFRESH`
    /// carries a blank token. Adopting it would silently sign the
    /// receiving tab out.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self.access_token() {
            Some(token) if token.trim().is_empty() => {
                Err(ProtocolError::InvalidMessage(format!(
                    "{} without an access token",
                    self.kind()
                )))
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Auth API bodies
// ---------------------------------------------------------------------------

/// `POST /login` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// `POST /register` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// `POST /refresh` body.
///
/// In server-held mode the refresh credential rides in an HTTP-only cookie
/// and the body is `{}`; in client-held mode it carries the credential.
/// `skip_serializing_if` gives us both shapes from one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl RefreshRequest {
    /// The server-held (cookie) form: an empty object.
    pub fn from_cookie() -> Self {
        Self::default()
    }

    /// The client-held form, carrying the stored credential.
    pub fn with_token(refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: Some(refresh_token.into()),
        }
    }
}

/// Response of sign-in, sign-up, and refresh.
///
/// `refresh_token` is only present in client-held mode, and on refresh
/// only when the server rotates the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// `GET /profile` response.
///
/// The role is echoed here for display only; authorization decisions read
/// the role claim from the access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The browser client parses these exact JSON shapes, so the tests pin
    //! the serde attributes rather than round-tripping every variant.

    use super::*;

    #[test]
    fn test_logout_serializes_as_bare_tag() {
        let json = serde_json::to_string(&SyncMessage::Logout).unwrap();
        assert_eq!(json, r#"{"type":"LOGOUT"}"#);
    }

    #[test]
    fn test_token_refresh_uses_camel_case_field() {
        let msg = SyncMessage::TokenRefresh {
            access_token: "abc".into(),
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "TOKEN_REFRESH");
        assert_eq!(value["accessToken"], "abc");
        assert!(value.get("access_token").is_none());
    }

    #[test]
    fn test_validate_blank_login_token_is_invalid() {
        let msg = SyncMessage::Login {
            access_token: "  ".into(),
        };
        assert!(matches!(
            msg.validate(),
            Err(ProtocolError::InvalidMessage(_))
        ));
        assert!(SyncMessage::Logout.validate().is_ok());
    }

    #[test]
    fn test_refresh_request_cookie_mode_is_empty_object() {
        let json =
            serde_json::to_string(&RefreshRequest::from_cookie()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_refresh_request_client_mode_carries_token() {
        let json =
            serde_json::to_string(&RefreshRequest::with_token("r-1")).unwrap();
        assert_eq!(json, r#"{"refreshToken":"r-1"}"#);
    }

    #[test]
    fn test_auth_info_without_refresh_token_parses() {
        // Server-held mode: the backend only returns the access token.
        let info: AuthInfo =
            serde_json::from_str(r#"{"accessToken":"a.b.c"}"#).unwrap();
        assert_eq!(info.access_token, "a.b.c");
        assert_eq!(info.refresh_token, None);
    }

    #[test]
    fn test_user_profile_role_is_optional() {
        let profile: UserProfile = serde_json::from_str(
            r#"{"username":"ada","email":"ada@example.com"}"#,
        )
        .unwrap();
        assert_eq!(profile.role, None);
    }
}
