//! Origin-scoped host primitives for Mailroom.
//!
//! A browser gives every tab of an origin two ways to talk to its
//! siblings: a `BroadcastChannel`, and the `storage` event fired when
//! another tab writes durable storage. This crate models both, plus the
//! storage itself, behind two small traits:
//!
//! - [`SyncChannel`]: post bytes to every other tab, receive theirs.
//! - [`DurableStorage`]: a per-origin string key/value store.
//!
//! [`Origin`] is an in-process implementation: one `Origin` per origin,
//! one [`Tab`] per client instance. Tabs opened from the same `Origin`
//! share storage and channels, and never hear their own messages.

#![allow(async_fn_in_trait)]

mod error;
mod origin;
mod storage_channel;

pub use error::TransportError;
pub use origin::{
    BroadcastPort, LocalStorage, Origin, OriginChannel, OriginConfig,
    StorageEvent, StorageEvents, Tab,
};
pub use storage_channel::StorageEventChannel;

use std::fmt;

/// Opaque identifier for a tab within an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(u64);

impl TabId {
    /// Creates a new `TabId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

/// A channel shared by every tab of an origin.
///
/// Delivery is fire-and-forget: no acknowledgment, no replay for tabs that
/// subscribe later, and a tab never receives what it posted itself.
pub trait SyncChannel: Send + Sync + 'static {
    /// The error type for channel operations.
    type Error: std::error::Error + Send + Sync;

    /// Posts data to every other tab on the channel.
    fn post(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next message posted by another tab.
    ///
    /// Returns `Ok(None)` once the channel is closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes this tab's end. Pending and future `recv` calls return
    /// `Ok(None)`; `post` fails.
    fn close(&self);

    /// The tab that owns this end of the channel.
    fn tab(&self) -> TabId;
}

/// Durable per-origin string storage (the `localStorage` model).
///
/// Writes are visible to every tab of the origin as soon as the call
/// returns.
pub trait DurableStorage: Send + Sync + 'static {
    /// Reads a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes a value.
    ///
    /// # Errors
    /// [`TransportError::QuotaExceeded`] when the origin's storage is full.
    fn set(&self, key: &str, value: &str) -> Result<(), TransportError>;

    /// Removes a value. Removing a missing key is a no-op.
    fn remove(&self, key: &str);
}
