//! Session configuration, resolved once at startup.

use std::time::Duration;

use tracing::warn;

/// Environment variable holding the API base URL.
pub const ENV_API_BASE_URL: &str = "MAILROOM_API_BASE_URL";

/// Environment variable selecting server-held refresh credentials
/// (`"true"`) over client-held ones.
pub const ENV_USE_COOKIE_AUTH: &str = "MAILROOM_USE_COOKIE_AUTH";

/// Base URL used when none is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";

/// Durable storage key of the theme preference.
///
/// Owned by the UI layer; listed here so no session key ever collides
/// with it.
pub const THEME_KEY: &str = "theme";

/// Where the refresh credential lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshMode {
    /// In the origin's durable storage, readable by the client.
    #[default]
    ClientHeld,
    /// In an HTTP-only cookie the client can neither read nor write.
    ServerHeld,
}

/// What [`TokenStore::schedule_renewal`](crate::TokenStore::schedule_renewal)
/// does with a token that has no time left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpiredTokenPolicy {
    /// Arm nothing. The next request that comes back `401` refreshes.
    #[default]
    Reactive,
    /// Run the renewal callback right away.
    RenewNow,
}

/// Well-known paths the session layer navigates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    pub sign_in: String,
    pub sign_up: String,
    /// Authenticated landing page.
    pub home: String,
    /// Where an authenticated but under-privileged user is sent.
    pub unauthorized: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            sign_in: "/log-in".to_string(),
            sign_up: "/sign-up".to_string(),
            home: "/".to_string(),
            unauthorized: "/".to_string(),
        }
    }
}

impl Routes {
    /// Whether `path` is one of the unauthenticated entry points.
    pub fn is_auth_page(&self, path: &str) -> bool {
        path == self.sign_in || path == self.sign_up
    }
}

/// Configuration for a tab's session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Origin of the mail API, e.g. `https://api.mail.example.com`.
    pub api_base_url: String,

    /// Client-held or server-held refresh credential.
    pub refresh_mode: RefreshMode,

    /// How long before expiry the silent renewal fires. Default: 60 s.
    pub safety_margin: Duration,

    /// Behaviour when a renewal is scheduled for an already expired token.
    pub expired_token_policy: ExpiredTokenPolicy,

    /// Random extra delay added to each renewal. Default: none.
    pub renewal_jitter: Duration,

    pub routes: Routes,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            refresh_mode: RefreshMode::default(),
            safety_margin: Duration::from_secs(60),
            expired_token_policy: ExpiredTokenPolicy::default(),
            renewal_jitter: Duration::ZERO,
            routes: Routes::default(),
        }
    }
}

impl SessionConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Unset or blank variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_API_BASE_URL)
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
        {
            config.api_base_url = url;
        }

        match lookup(ENV_USE_COOKIE_AUTH).as_deref() {
            Some("true") => config.refresh_mode = RefreshMode::ServerHeld,
            Some("false") | Some("") | None => {}
            Some(other) => warn!(
                var = ENV_USE_COOKIE_AUTH,
                value = other,
                "unrecognized value, keeping client-held refresh credentials"
            ),
        }

        config
    }
}
