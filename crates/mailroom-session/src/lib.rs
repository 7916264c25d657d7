//! Session lifecycle for Mailroom.
//!
//! This crate owns everything a tab knows about "who is signed in":
//!
//! 1. **Claims** ([`claims`]): reading expiry and role out of the access
//!    token, without verifying it.
//! 2. **Token store** ([`TokenStore`]): the in-memory access token and its
//!    single renewal alarm.
//! 3. **Refresh credential** ([`RefreshHandle`]): the durable half of the
//!    session, client-held or server-held.
//! 4. **Refresh** ([`RefreshCoordinator`]): one network exchange no matter
//!    how many callers ask at once.
//! 5. **Cross-tab sync** ([`AuthSync`]): sign-in, sign-out and renewal
//!    propagated to the other tabs of the origin.
//! 6. **Gates** ([`RoleGate`], [`RouteGuard`]): role predicates and route
//!    entry hooks.
//!
//! # How it fits in the stack
//!
//! ```text
//! Client (above)        ← HTTP, 401 retry, sign-in/out flows
//!     ↕
//! Session (this crate)  ← token state, refresh, sync, gates
//!     ↕
//! Protocol / Transport / Timer (below)
//! ```
//!
//! The network is behind the [`AuthApi`] trait; the location bar behind
//! [`Navigator`].

#![allow(async_fn_in_trait)]

mod auth;
pub mod claims;
mod config;
mod coordinator;
mod error;
mod guard;
mod navigator;
mod refresh_handle;
mod role;
mod store;
mod sync;

pub use auth::AuthApi;
pub use claims::Claims;
pub use config::{
    DEFAULT_API_BASE_URL, ENV_API_BASE_URL, ENV_USE_COOKIE_AUTH,
    ExpiredTokenPolicy, RefreshMode, Routes, SessionConfig, THEME_KEY,
};
pub use coordinator::RefreshCoordinator;
pub use error::SessionError;
pub use guard::{RouteDecision, RouteGuard};
pub use navigator::{Location, Navigator};
pub use refresh_handle::{REFRESH_TOKEN_KEY, RefreshCredential, RefreshHandle};
pub use role::RoleGate;
pub use store::{Renewal, TokenStore};
pub use sync::{AuthSync, CHANNEL_NAME, SYNC_EVENT_KEY};
