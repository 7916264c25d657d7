//! [`AuthApi`] over HTTP.
//!
//! These calls go out without the access token and outside the 401-retry
//! path: a refresh that fails must never trigger another refresh.

use mailroom_protocol::{
    AuthInfo, ProtocolError, RefreshRequest, SignInRequest, SignUpRequest,
};
use mailroom_session::{AuthApi, RefreshMode, SessionConfig, SessionError};
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::debug;

use crate::MailroomError;
use crate::error::error_message;

/// Builds the HTTP client shared by the auth endpoints and the protected
/// API.
///
/// In server-held mode the refresh credential is a cookie, so the client
/// keeps a cookie jar and sends it with every request.
pub fn build_http_client(config: &SessionConfig) -> Result<Client, MailroomError> {
    Client::builder()
        .cookie_store(config.refresh_mode == RefreshMode::ServerHeld)
        .build()
        .map_err(|e| MailroomError::Config(e.to_string()))
}

/// Joins the API base URL and an endpoint path.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// The auth endpoints of the mail API.
#[derive(Clone)]
pub struct HttpAuthApi {
    http: Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, SessionError> {
        let url = endpoint(&self.base_url, path);
        let mut request = self.http.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(%url, status = status.as_u16(), "auth call succeeded");
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SessionError::Rejected {
            status: status.as_u16(),
            message: error_message(&body, ""),
        })
    }

    async fn post_for_session<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<AuthInfo, SessionError> {
        let response = self.post(path, Some(body)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SessionError::Unreachable(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SessionError::from(ProtocolError::Decode(e)))
    }
}

impl AuthApi for HttpAuthApi {
    async fn sign_in(&self, request: SignInRequest) -> Result<AuthInfo, SessionError> {
        self.post_for_session("/login", &request).await
    }

    async fn sign_up(&self, request: SignUpRequest) -> Result<AuthInfo, SessionError> {
        self.post_for_session("/register", &request).await
    }

    async fn sign_out(&self) -> Result<(), SessionError> {
        self.post::<()>("/logout", None).await.map(|_| ())
    }

    async fn refresh(&self, request: RefreshRequest) -> Result<AuthInfo, SessionError> {
        self.post_for_session("/refresh", &request).await
    }
}
