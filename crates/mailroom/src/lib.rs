//! # Mailroom
//!
//! Session lifecycle core of a browser-style web mail client.
//!
//! Mailroom keeps a short-lived access token in memory, renews it before
//! it expires, recovers transparently from `401` responses, keeps every
//! tab of an origin signed in (or out) together, and decides which routes
//! a user may enter.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mailroom::prelude::*;
//!
//! # async fn run() -> Result<(), MailroomError> {
//! mailroom::telemetry::init();
//!
//! let origin = Origin::new("https://mail.example");
//! let tab = origin.open_tab();
//! let client = SessionClient::connect(SessionConfig::from_env(), &tab, Location::default())?;
//!
//! client.boot().await;
//! if client.guard().ensure_auth_for_route(&[]).await.is_proceed() {
//!     let profile = client.profile().await?;
//!     println!("signed in as {}", profile.username);
//! }
//! # Ok(())
//! # }
//! ```

mod api;
mod client;
mod error;
mod http;
mod notice;
pub mod telemetry;

pub use api::ApiClient;
pub use client::{OAuthLogin, SessionClient};
pub use error::{ApiError, MailroomError, error_message};
pub use http::{HttpAuthApi, build_http_client};
pub use notice::Notice;

pub use mailroom_protocol as protocol;
pub use mailroom_session as session;
pub use mailroom_timer as timer;
pub use mailroom_transport as transport;

/// Everything an app shell needs, in one import.
pub mod prelude {
    pub use crate::{
        ApiClient, ApiError, HttpAuthApi, MailroomError, Notice, OAuthLogin, SessionClient,
    };
    pub use mailroom_protocol::{SyncMessage, UserProfile};
    pub use mailroom_session::{
        AuthApi, Location, Navigator, RefreshMode, RoleGate, RouteDecision, RouteGuard, Routes,
        SessionConfig,
    };
    pub use mailroom_transport::{Origin, Tab, TabId};
}
