//! Cross-tab session sync.
//!
//! Every tab of an origin keeps its own in-memory session. When one tab
//! signs in, signs out, or renews its token, it tells the others with a
//! [`SyncMessage`] on the origin's `auth-sync-channel`. Origins without a
//! broadcast primitive fall back to storage events on `auth-sync-event`
//! (see [`StorageEventChannel`](mailroom_transport::StorageEventChannel)).
//!
//! # Dispatch table
//!
//! | message         | local effect                  | navigation                       |
//! |-----------------|-------------------------------|----------------------------------|
//! | `LOGOUT`        | purge token, renewal, refresh | to sign-in, unless on an auth page |
//! | `LOGIN`         | adopt token                   | to home, if on an auth page      |
//! | `TOKEN_REFRESH` | adopt token                   | none                             |
//!
//! Handlers never touch the network and are idempotent, since delivery
//! order across tabs is not causal order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use mailroom_protocol::{Codec, JsonCodec, ProtocolError, SyncMessage};
use mailroom_transport::{OriginChannel, SyncChannel, Tab, TabId};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Navigator, RefreshHandle, Routes, SessionError, TokenStore};

/// Broadcast channel name shared by every tab of the origin.
pub const CHANNEL_NAME: &str = "auth-sync-channel";

/// Durable storage key used by the storage-event fallback.
pub const SYNC_EVENT_KEY: &str = "auth-sync-event";

struct SyncInner {
    channel: Arc<OriginChannel>,
    codec: JsonCodec,
    store: TokenStore,
    credential: RefreshHandle,
    navigator: Arc<dyn Navigator>,
    routes: Routes,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        self.channel.close();
        if let Some(handle) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A tab's end of the cross-tab session channel.
///
/// Cheap to clone. The channel closes when the last clone is dropped or
/// [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct AuthSync {
    inner: Arc<SyncInner>,
}

impl AuthSync {
    /// Opens the sync channel for `tab`, preferring broadcast and falling
    /// back to storage events.
    pub fn open(
        tab: &Tab,
        store: TokenStore,
        credential: RefreshHandle,
        navigator: Arc<dyn Navigator>,
        routes: Routes,
    ) -> Self {
        let channel = tab.sync_channel(CHANNEL_NAME, SYNC_EVENT_KEY);
        info!(tab = %tab.id(), kind = channel.kind(), "auth sync channel opened");
        Self {
            inner: Arc::new(SyncInner {
                channel: Arc::new(channel),
                codec: JsonCodec,
                store,
                credential,
                navigator,
                routes,
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn tab(&self) -> TabId {
        self.inner.channel.tab()
    }

    /// `"broadcast"` or `"storage-events"`.
    pub fn channel_kind(&self) -> &'static str {
        self.inner.channel.kind()
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Tells the other tabs the user signed in.
    pub fn broadcast_login(&self, access_token: &str) {
        self.post(&SyncMessage::Login {
            access_token: access_token.to_string(),
        });
    }

    /// Tells the other tabs the session is over.
    pub fn broadcast_logout(&self) {
        self.post(&SyncMessage::Logout);
    }

    /// Tells the other tabs the access token was renewed.
    pub fn broadcast_token_refresh(&self, access_token: &str) {
        self.post(&SyncMessage::TokenRefresh {
            access_token: access_token.to_string(),
        });
    }

    /// Fire-and-forget: a failed send is logged, never returned.
    fn post(&self, message: &SyncMessage) {
        let tab = self.tab();
        let result = self
            .inner
            .codec
            .encode(message)
            .map_err(SessionError::from)
            .and_then(|bytes| {
                self.inner.channel.post(&bytes).map_err(SessionError::from)
            });
        match result {
            Ok(()) => debug!(tab = %tab, kind = message.kind(), "sync message sent"),
            Err(e) => warn!(
                tab = %tab,
                kind = message.kind(),
                error = %e,
                "failed to broadcast sync message"
            ),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Applies a message from another tab.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] for a `LOGIN` or `TOKEN_REFRESH`
    /// with a blank token; nothing is changed in that case.
    pub fn dispatch(&self, message: SyncMessage) -> Result<(), ProtocolError> {
        message.validate()?;
        debug!(tab = %self.tab(), kind = message.kind(), "sync message received");
        match message {
            SyncMessage::Logout => self.on_logout(),
            SyncMessage::Login { access_token } => self.on_login(access_token),
            SyncMessage::TokenRefresh { access_token } => {
                self.on_token_refresh(access_token)
            }
        }
        Ok(())
    }

    /// Decodes and applies raw channel bytes. Bad payloads are logged and
    /// dropped.
    pub fn dispatch_bytes(&self, data: &[u8]) {
        let result = self
            .inner
            .codec
            .decode::<SyncMessage>(data)
            .and_then(|message| self.dispatch(message));
        if let Err(e) = result {
            warn!(tab = %self.tab(), error = %e, "ignoring bad sync message");
        }
    }

    fn on_logout(&self) {
        info!(tab = %self.tab(), "logout detected from another tab");
        self.inner.store.purge(&self.inner.credential);
        let path = self.inner.navigator.current_path();
        if !self.inner.routes.is_auth_page(&path) {
            self.inner.navigator.navigate(&self.inner.routes.sign_in);
        }
    }

    fn on_login(&self, access_token: String) {
        info!(tab = %self.tab(), "login detected from another tab");
        self.inner.store.set_access_token(access_token);
        let path = self.inner.navigator.current_path();
        if self.inner.routes.is_auth_page(&path) {
            self.inner.navigator.navigate(&self.inner.routes.home);
        }
    }

    fn on_token_refresh(&self, access_token: String) {
        debug!(tab = %self.tab(), "token refresh detected from another tab");
        self.inner.store.set_access_token(access_token);
    }

    // -----------------------------------------------------------------------
    // Listener
    // -----------------------------------------------------------------------

    /// Starts the inbound loop on its own task.
    ///
    /// Returns `false` if a listener is already running. The task holds
    /// only a weak reference to the sync state, so dropping every
    /// `AuthSync` clone stops it.
    pub fn spawn_listener(&self) -> bool {
        let mut listener = lock(&self.inner.listener);
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let channel = Arc::clone(&self.inner.channel);
        let weak: Weak<SyncInner> = Arc::downgrade(&self.inner);
        let tab = channel.tab();
        *listener = Some(tokio::spawn(async move {
            loop {
                match channel.recv().await {
                    Ok(Some(data)) => {
                        let Some(inner) = weak.upgrade() else { break };
                        AuthSync { inner }.dispatch_bytes(&data);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(tab = %tab, error = %e, "auth sync channel failed");
                        break;
                    }
                }
            }
            debug!(tab = %tab, "auth sync listener stopped");
        }));
        true
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.inner.listener)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Closes this tab's end and stops the listener.
    ///
    /// Later broadcasts from this tab are dropped (and logged).
    pub fn shutdown(&self) {
        self.inner.channel.close();
        if let Some(handle) = lock(&self.inner.listener).take() {
            handle.abort();
        }
        info!(tab = %self.tab(), "auth sync shut down");
    }
}
