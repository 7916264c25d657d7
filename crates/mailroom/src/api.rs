//! The request authenticator: every call to the protected API goes
//! through [`ApiClient`].
//!
//! ```text
//! send(request)
//!   │  attach "Authorization: Bearer <token>" (if any)
//!   ▼
//! response ── no response ──→ Notice::Connectivity, ApiError::Connectivity
//!   │
//!   ├─ 401 (first time) ──→ refresh() ─┬─ Some(token) → reissue once with token
//!   │                                  └─ None → Notice::SessionExpired,
//!   │                                            navigate to sign-in,
//!   │                                            ApiError::SessionExpired
//!   ├─ 401 (after retry) ──→ ApiError::Unauthorized (never retried again)
//!   ├─ other error status ──→ ApiError::Status
//!   └─ success ──→ Ok(response)
//! ```

use std::sync::Arc;

use mailroom_session::{AuthApi, Navigator, RefreshCoordinator, Routes};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::error_message;
use crate::http::endpoint;
use crate::{ApiError, Notice};

/// Buffered notices before a slow UI subscriber starts missing some.
const NOTICE_CAPACITY: usize = 16;

/// HTTP client for the protected API.
pub struct ApiClient<A: AuthApi> {
    http: Client,
    base_url: String,
    coordinator: RefreshCoordinator<A>,
    navigator: Arc<dyn Navigator>,
    routes: Routes,
    notices: broadcast::Sender<Notice>,
}

impl<A: AuthApi> Clone for ApiClient<A> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            coordinator: self.coordinator.clone(),
            navigator: Arc::clone(&self.navigator),
            routes: self.routes.clone(),
            notices: self.notices.clone(),
        }
    }
}

impl<A: AuthApi> ApiClient<A> {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        coordinator: RefreshCoordinator<A>,
        navigator: Arc<dyn Navigator>,
        routes: Routes,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            http,
            base_url: base_url.into(),
            coordinator,
            navigator,
            routes,
            notices,
        }
    }

    /// Starts a request to `path` on the API. Send it with
    /// [`send`](Self::send).
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, endpoint(&self.base_url, path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Notices raised from now on.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Sends a request with the current access token, recovering from one
    /// `401` by refreshing and reissuing it.
    ///
    /// # Errors
    /// See [`ApiError`]. Requests with a streaming body cannot be
    /// reissued; their `401` is returned as [`ApiError::Unauthorized`].
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let request = request
            .build()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let replay = request.try_clone();

        let token = self.coordinator.store().access_token();
        let response = self.execute(request, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        let Some(replay) = replay else {
            warn!("401 on a request that cannot be replayed");
            return Err(ApiError::Unauthorized);
        };

        debug!(url = %replay.url(), "401, refreshing before one retry");
        let Some(token) = self.coordinator.refresh().await else {
            self.expire_session();
            return Err(ApiError::SessionExpired);
        };

        let response = self.execute(replay, Some(&token)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %response.url(), "still unauthorized after refresh");
            return Err(ApiError::Unauthorized);
        }
        check_status(response).await
    }

    /// [`send`](Self::send), then decodes the JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Connectivity(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// `GET path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(self.get(path)).await
    }

    async fn execute(
        &self,
        mut request: Request,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        if let Some(token) = token {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    request.headers_mut().insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("access token is not a valid header value, sending without it"),
            }
        }
        self.http.execute(request).await.map_err(|e| {
            warn!(error = %e, "request got no response");
            self.notify(Notice::Connectivity);
            ApiError::Connectivity(e.to_string())
        })
    }

    fn expire_session(&self) {
        warn!("session could not be renewed, sending tab to sign-in");
        // Navigation does not reload the tab: nothing may survive for the
        // sign-in page to find.
        self.coordinator
            .store()
            .purge(self.coordinator.credential());
        self.notify(Notice::SessionExpired);
        self.navigator.navigate(&self.routes.sign_in);
    }

    pub(crate) fn notify(&self, notice: Notice) {
        // No subscriber is fine: nobody is showing notices.
        let _ = self.notices.send(notice);
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let fallback = status.canonical_reason().unwrap_or("request failed");
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message: error_message(&body, fallback),
    })
}
