//! `SessionClient`: one tab's session, fully wired.
//!
//! This is the entry point for an app shell. It ties the layers together:
//! transport → protocol → session → HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use mailroom_protocol::{ProtocolError, SignInRequest, SignUpRequest, UserProfile};
use mailroom_session::{
    AuthApi, AuthSync, Navigator, REFRESH_TOKEN_KEY, RefreshCoordinator, RefreshCredential,
    RefreshHandle, RoleGate, RouteGuard, SessionConfig, SessionError, TokenStore,
};
use mailroom_transport::{Tab, TabId};
use reqwest::{Client, Url};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::http::{HttpAuthApi, build_http_client};
use crate::{ApiClient, ApiError, MailroomError, Notice};

const SIGN_IN_FAILED: &str = "Unable to sign in. Please try again.";
const SIGN_UP_FAILED: &str = "Unable to sign up. Please try again.";

/// Who just signed in through the OAuth redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthLogin {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl OAuthLogin {
    /// Name for the welcome message: the username, else the email.
    pub fn display_name(&self) -> Option<&str> {
        self.username.as_deref().or(self.email.as_deref())
    }
}

/// Aborts the credential watch when the last client clone goes away.
struct WatchTask(JoinHandle<()>);

impl Drop for WatchTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A tab's session: token store, refresh, cross-tab sync, guards, and the
/// authenticated HTTP client.
///
/// Cheap to clone; clones share everything.
///
/// # Example
///
/// ```rust,ignore
/// use mailroom::prelude::*;
///
/// let origin = Origin::new("https://mail.example");
/// let tab = origin.open_tab();
/// let client = SessionClient::connect(SessionConfig::from_env(), &tab, Location::default())?;
/// if client.boot().await {
///     let me = client.profile().await?;
/// }
/// ```
pub struct SessionClient<A: AuthApi = HttpAuthApi> {
    config: SessionConfig,
    tab: TabId,
    coordinator: RefreshCoordinator<A>,
    guard: RouteGuard<A>,
    api: ApiClient<A>,
    navigator: Arc<dyn Navigator>,
    watch: Arc<WatchTask>,
}

impl<A: AuthApi> Clone for SessionClient<A> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            tab: self.tab,
            coordinator: self.coordinator.clone(),
            guard: self.guard.clone(),
            api: self.api.clone(),
            navigator: Arc::clone(&self.navigator),
            watch: Arc::clone(&self.watch),
        }
    }
}

impl SessionClient<HttpAuthApi> {
    /// Opens a session for `tab` against the HTTP API named by `config`.
    ///
    /// Must be called inside a Tokio runtime: the cross-tab listener is
    /// spawned here.
    ///
    /// # Errors
    /// [`MailroomError::Config`] if the HTTP client cannot be built.
    pub fn connect(
        config: SessionConfig,
        tab: &Tab,
        navigator: impl Navigator,
    ) -> Result<Self, MailroomError> {
        let http = build_http_client(&config)?;
        let auth = HttpAuthApi::new(http.clone(), config.api_base_url.clone());
        Ok(Self::with_api(config, tab, navigator, auth, http))
    }
}

impl<A: AuthApi> SessionClient<A> {
    /// Opens a session with a custom auth backend. `http` is used for the
    /// protected API.
    pub fn with_api(
        config: SessionConfig,
        tab: &Tab,
        navigator: impl Navigator,
        auth: A,
        http: Client,
    ) -> Self {
        let navigator: Arc<dyn Navigator> = Arc::new(navigator);
        let store = TokenStore::new(&config);
        let credential = RefreshHandle::new(config.refresh_mode, tab.local_storage());
        let sync = AuthSync::open(
            tab,
            store.clone(),
            credential.clone(),
            Arc::clone(&navigator),
            config.routes.clone(),
        );
        sync.spawn_listener();

        let coordinator = RefreshCoordinator::new(auth, store.clone(), credential, sync);
        let guard = RouteGuard::new(coordinator.clone(), config.routes.clone());
        let api = ApiClient::new(
            http,
            config.api_base_url.clone(),
            coordinator.clone(),
            Arc::clone(&navigator),
            config.routes.clone(),
        );
        let watch = spawn_credential_watch(tab, store);

        info!(
            tab = %tab.id(),
            mode = ?config.refresh_mode,
            base_url = %config.api_base_url,
            "session client ready"
        );

        Self {
            config,
            tab: tab.id(),
            coordinator,
            guard,
            api,
            navigator,
            watch: Arc::new(WatchTask(watch)),
        }
    }

    // -----------------------------------------------------------------------
    // Flows
    // -----------------------------------------------------------------------

    /// Restores the session at startup.
    ///
    /// A stored refresh token is traded for an access token; if that
    /// fails the user is told the session expired. Returns whether the tab
    /// ends up authenticated.
    pub async fn boot(&self) -> bool {
        if self.store().has_access_token() {
            self.coordinator.schedule_renewal();
            return true;
        }
        // A server-held cookie cannot be seen from here; the route guard
        // tries it on first navigation instead.
        if !matches!(self.credential().get(), Some(RefreshCredential::Token(_))) {
            debug!(tab = %self.tab, "nothing to restore");
            return false;
        }
        match self.coordinator.refresh().await {
            Some(_) => {
                info!(tab = %self.tab, "session restored");
                true
            }
            None => {
                self.api.notify(Notice::SessionExpired);
                false
            }
        }
    }

    /// Signs in with email and password, then goes home.
    ///
    /// # Errors
    /// [`MailroomError::Auth`] with the server's message, or a generic
    /// one when it sent none.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), MailroomError> {
        let request = SignInRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let session = self
            .coordinator
            .api()
            .sign_in(request)
            .await
            .map_err(|e| MailroomError::auth(e, SIGN_IN_FAILED))?;
        if session.access_token.is_empty() {
            return Err(MailroomError::auth(missing_token(), SIGN_IN_FAILED));
        }

        self.establish(&session.access_token, session.refresh_token.as_deref());
        self.navigator.navigate(&self.config.routes.home);
        Ok(())
    }

    /// Creates an account, then sends the user to sign-in. The new account
    /// is not signed in.
    ///
    /// # Errors
    /// [`MailroomError::Auth`], as for [`sign_in`](Self::sign_in).
    pub async fn sign_up(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), MailroomError> {
        let request = SignUpRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        self.coordinator
            .api()
            .sign_up(request)
            .await
            .map_err(|e| MailroomError::auth(e, SIGN_UP_FAILED))?;
        info!(tab = %self.tab, "account created");
        self.navigator.navigate(&self.config.routes.sign_in);
        Ok(())
    }

    /// Ends the session here and in every other tab, then goes to sign-in.
    ///
    /// The server call is best effort: local state is purged whatever it
    /// answers.
    pub async fn sign_out(&self) {
        if let Err(e) = self.coordinator.api().sign_out().await {
            warn!(tab = %self.tab, error = %e, "sign-out call failed, purging anyway");
        }
        self.store().purge(self.credential());
        self.sync().broadcast_logout();
        info!(tab = %self.tab, "signed out");
        self.navigator.navigate(&self.config.routes.sign_in);
    }

    /// Finishes an OAuth sign-in from the callback URL the provider
    /// redirected to. Absolute URLs and bare `/path?query` forms are both
    /// accepted.
    ///
    /// On success the session is stored like a password sign-in and the tab
    /// goes home. On failure it goes to sign-in.
    ///
    /// # Errors
    /// [`MailroomError::OAuthCallback`] if either token is missing.
    pub fn complete_oauth(&self, callback: &str) -> Result<OAuthLogin, MailroomError> {
        let params = match callback_params(callback) {
            Ok(params) => params,
            Err(e) => {
                self.navigator.navigate(&self.config.routes.sign_in);
                return Err(e);
            }
        };

        let (Some(access_token), Some(refresh_token)) =
            (params.get("accessToken"), params.get("refreshToken"))
        else {
            warn!(tab = %self.tab, "OAuth callback without tokens");
            self.navigator.navigate(&self.config.routes.sign_in);
            return Err(MailroomError::OAuthCallback(
                "missing access or refresh token".to_string(),
            ));
        };

        self.establish(access_token, Some(refresh_token.as_str()));
        self.navigator.navigate(&self.config.routes.home);
        Ok(OAuthLogin {
            username: params.get("username").cloned(),
            email: params.get("email").cloned(),
        })
    }

    /// The signed-in user's profile.
    ///
    /// # Errors
    /// See [`ApiError`].
    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        self.api.get_json("/profile").await
    }

    /// Stops listening to the other tabs and cancels renewal. The session
    /// itself is left as is.
    pub fn shutdown(&self) {
        self.sync().shutdown();
        self.store().clear_renewal();
        self.watch.0.abort();
        debug!(tab = %self.tab, "session client shut down");
    }

    fn establish(&self, access_token: &str, refresh_token: Option<&str>) {
        if let Some(refresh_token) = refresh_token {
            if let Err(e) = self.credential().set(refresh_token) {
                warn!(tab = %self.tab, error = %e, "could not persist refresh credential");
            }
        }
        self.store().set_access_token(access_token);
        let renewal = self.coordinator.schedule_renewal();
        self.sync().broadcast_login(access_token);
        info!(tab = %self.tab, ?renewal, "signed in");
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn store(&self) -> &TokenStore {
        self.coordinator.store()
    }

    pub fn credential(&self) -> &RefreshHandle {
        self.coordinator.credential()
    }

    pub fn sync(&self) -> &AuthSync {
        self.coordinator.sync()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator<A> {
        &self.coordinator
    }

    pub fn guard(&self) -> &RouteGuard<A> {
        &self.guard
    }

    pub fn roles(&self) -> &RoleGate {
        self.guard.roles()
    }

    /// The authenticated client for the protected API.
    pub fn api(&self) -> &ApiClient<A> {
        &self.api
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.api.subscribe_notices()
    }
}

fn missing_token() -> SessionError {
    ProtocolError::InvalidMessage("response carried no access token".to_string()).into()
}

/// Non-empty query parameters of an OAuth callback URL.
fn callback_params(callback: &str) -> Result<HashMap<String, String>, MailroomError> {
    let url = match Url::parse(callback) {
        Ok(url) => url,
        Err(_) => Url::parse("http://localhost/")
            .and_then(|base| base.join(callback))
            .map_err(|e| MailroomError::OAuthCallback(e.to_string()))?,
    };
    Ok(url
        .query_pairs()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect())
}

/// Another tab removing the refresh credential means it signed out: drop
/// the access token here too.
fn spawn_credential_watch(tab: &Tab, store: TokenStore) -> JoinHandle<()> {
    let mut events = tab.local_storage().events();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if event.key == REFRESH_TOKEN_KEY
                && event.new_value.is_none()
                && store.has_access_token()
            {
                info!(source = %event.source, "refresh credential removed elsewhere, dropping access token");
                store.clear_access_token();
            }
        }
    })
}
