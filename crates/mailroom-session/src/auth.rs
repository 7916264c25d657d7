//! The seam between the session core and the auth backend.
//!
//! The session layer never builds HTTP requests itself. It calls an
//! [`AuthApi`], which the `mailroom` crate implements over `reqwest` and
//! tests implement with scripted responses.

use std::future::Future;

use mailroom_protocol::{AuthInfo, RefreshRequest, SignInRequest, SignUpRequest};

use crate::SessionError;

/// The unauthenticated auth endpoints.
///
/// None of these calls carry the access token, and none of them go through
/// the 401-retry path: a failed refresh must not trigger another refresh.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because the refresh exchange runs on its own
/// Tokio task and may outlive the caller that started it.
pub trait AuthApi: Send + Sync + 'static {
    /// `POST /login`.
    fn sign_in(
        &self,
        request: SignInRequest,
    ) -> impl Future<Output = Result<AuthInfo, SessionError>> + Send;

    /// `POST /register`.
    fn sign_up(
        &self,
        request: SignUpRequest,
    ) -> impl Future<Output = Result<AuthInfo, SessionError>> + Send;

    /// `POST /logout`. Callers purge the local session whatever this
    /// returns.
    fn sign_out(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// `POST /refresh`: trades the refresh credential for a new access
    /// token, and possibly a rotated credential.
    fn refresh(
        &self,
        request: RefreshRequest,
    ) -> impl Future<Output = Result<AuthInfo, SessionError>> + Send;
}
