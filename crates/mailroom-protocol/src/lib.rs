//! Wire protocol for Mailroom.
//!
//! This crate defines what the session layer puts on the wire:
//!
//! - **Sync messages** ([`SyncMessage`]): the tagged events one tab
//!   broadcasts to the other tabs of the same origin.
//! - **Auth API bodies** ([`SignInRequest`], [`RefreshRequest`],
//!   [`AuthInfo`], [`UserProfile`], ...): the JSON exchanged with the
//!   mail backend's authentication endpoints.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those values are
//!   converted to and from bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (SyncMessage / AuthInfo) → Session (token state)
//! ```
//!
//! The protocol layer knows nothing about tabs, storage, or timers; it only
//! knows the shapes of the messages.

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    AuthInfo, RefreshRequest, SignInRequest, SignUpRequest, SyncMessage,
    UserProfile,
};
