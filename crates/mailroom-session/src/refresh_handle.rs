//! Durable home of the refresh credential.
//!
//! The access token lives in memory and dies with the tab. The refresh
//! credential has to survive a reload, and where it survives depends on the
//! backend:
//!
//! - **Client-held**: the backend returns it in the response body and the
//!   client keeps it in the origin's durable storage.
//! - **Server-held**: the backend sets an HTTP-only cookie. The client can
//!   never see it, only assume it is there.
//!
//! [`RefreshHandle`] hides the difference. Outside this file the mode is
//! only consulted when building the refresh body
//! ([`RefreshCredential::to_request`]) and when persisting a rotated
//! credential ([`RefreshHandle::set`] is a no-op in server-held mode).

use std::sync::Arc;

use mailroom_protocol::RefreshRequest;
use mailroom_transport::{DurableStorage, TransportError};
use tracing::{debug, trace};

use crate::RefreshMode;

/// Durable storage key of the client-held refresh credential.
pub const REFRESH_TOKEN_KEY: &str = "auth_refresh_token";

/// What [`RefreshHandle::get`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshCredential {
    /// The literal credential (client-held mode).
    Token(String),
    /// Present, but only the server can read it (server-held mode).
    Opaque,
}

impl RefreshCredential {
    /// The `POST /refresh` body carrying this credential.
    pub fn to_request(&self) -> RefreshRequest {
        match self {
            Self::Token(token) => RefreshRequest::with_token(token.clone()),
            Self::Opaque => RefreshRequest::from_cookie(),
        }
    }
}

/// A tab's handle on the persisted refresh credential.
///
/// Cheap to clone; clones share the same storage.
#[derive(Clone)]
pub struct RefreshHandle {
    mode: RefreshMode,
    storage: Arc<dyn DurableStorage>,
}

impl RefreshHandle {
    pub fn new(mode: RefreshMode, storage: impl DurableStorage) -> Self {
        Self::from_arc(mode, Arc::new(storage))
    }

    pub fn from_arc(mode: RefreshMode, storage: Arc<dyn DurableStorage>) -> Self {
        Self { mode, storage }
    }

    pub fn mode(&self) -> RefreshMode {
        self.mode
    }

    /// Reads the credential.
    ///
    /// Server-held mode always reports [`RefreshCredential::Opaque`]; an
    /// empty stored value counts as absent.
    pub fn get(&self) -> Option<RefreshCredential> {
        match self.mode {
            RefreshMode::ClientHeld => self
                .storage
                .get(REFRESH_TOKEN_KEY)
                .filter(|token| !token.is_empty())
                .map(RefreshCredential::Token),
            RefreshMode::ServerHeld => Some(RefreshCredential::Opaque),
        }
    }

    /// Whether a refresh could be attempted at all.
    pub fn is_present(&self) -> bool {
        self.get().is_some()
    }

    /// Persists a (possibly rotated) credential. No-op in server-held mode.
    ///
    /// # Errors
    /// [`TransportError::QuotaExceeded`] when the origin's storage is full.
    pub fn set(&self, credential: &str) -> Result<(), TransportError> {
        match self.mode {
            RefreshMode::ClientHeld => {
                self.storage.set(REFRESH_TOKEN_KEY, credential)?;
                trace!("refresh credential persisted");
                Ok(())
            }
            RefreshMode::ServerHeld => Ok(()),
        }
    }

    /// Forgets the credential.
    ///
    /// In server-held mode the cookie can only be invalidated by the
    /// server, through the sign-out call, so there is nothing to do here.
    pub fn clear(&self) {
        match self.mode {
            RefreshMode::ClientHeld => self.storage.remove(REFRESH_TOKEN_KEY),
            RefreshMode::ServerHeld => {
                debug!("refresh credential is server-held, cleared by sign-out")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mailroom_transport::Origin;

    use super::*;

    fn handle(mode: RefreshMode) -> (RefreshHandle, impl DurableStorage) {
        let tab = Origin::new("https://mail.test").open_tab();
        (RefreshHandle::new(mode, tab.local_storage()), tab.local_storage())
    }

    #[test]
    fn test_client_held_set_get_clear() {
        let (handle, storage) = handle(RefreshMode::ClientHeld);
        assert_eq!(handle.get(), None);

        handle.set("r-1").unwrap();
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).as_deref(), Some("r-1"));
        assert_eq!(handle.get(), Some(RefreshCredential::Token("r-1".into())));

        handle.clear();
        assert_eq!(handle.get(), None);
        assert_eq!(storage.get(REFRESH_TOKEN_KEY), None);
    }

    #[test]
    fn test_client_held_empty_value_is_absent() {
        let (handle, storage) = handle(RefreshMode::ClientHeld);
        storage.set(REFRESH_TOKEN_KEY, "").unwrap();
        assert!(!handle.is_present());
    }

    #[test]
    fn test_server_held_is_always_present_and_never_written() {
        let (handle, storage) = handle(RefreshMode::ServerHeld);
        assert_eq!(handle.get(), Some(RefreshCredential::Opaque));

        handle.set("r-1").unwrap();
        assert_eq!(storage.get(REFRESH_TOKEN_KEY), None);

        handle.clear();
        assert!(handle.is_present());
    }

    #[test]
    fn test_to_request_matches_mode() {
        assert_eq!(
            RefreshCredential::Opaque.to_request(),
            RefreshRequest::from_cookie()
        );
        assert_eq!(
            RefreshCredential::Token("r".into()).to_request(),
            RefreshRequest::with_token("r")
        );
    }
}
