//! Single-flight token refresh.
//!
//! Many things want a fresh access token at once: a burst of requests that
//! all came back `401`, the renewal alarm, a route guard. They must share
//! **one** network exchange, because the backend may rotate the refresh
//! credential and a second exchange would present a credential that is
//! already spent.
//!
//! ```text
//! refresh() ─┬─ ticket exists? ── yes ──→ await the same ticket
//!            │
//!            └─ no ──→ create ticket ──→ spawn exchange ──→ await ticket
//!                                             │
//!                         ┌───────────────────┴──────────────────┐
//!                      success                                failure
//!                store token, persist rotated           purge token, renewal,
//!                credential, re-arm renewal,            and refresh credential
//!                broadcast TOKEN_REFRESH
//!                         └───────────────────┬──────────────────┘
//!                                    remove ticket, resolve
//! ```
//!
//! The ticket is created while the slot lock is held and before the first
//! `.await`, so two callers can never both see "no ticket". The exchange
//! runs on its own task: a caller that drops its future does not strand
//! the other waiters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use mailroom_protocol::AuthInfo;
use tracing::{debug, info, warn};

use crate::store::Renewal;
use crate::{AuthApi, AuthSync, RefreshCredential, RefreshHandle, TokenStore};

type Ticket = Shared<BoxFuture<'static, Option<String>>>;

struct InFlight {
    id: u64,
    ticket: Ticket,
}

struct CoordinatorInner<A> {
    api: A,
    store: TokenStore,
    credential: RefreshHandle,
    sync: AuthSync,
    inflight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
    exchanges: AtomicU64,
}

fn lock(slot: &Mutex<Option<InFlight>>) -> MutexGuard<'_, Option<InFlight>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the ticket when the exchange task ends, even by panic or abort.
struct TicketGuard<A: AuthApi> {
    inner: Arc<CoordinatorInner<A>>,
    id: u64,
}

impl<A: AuthApi> Drop for TicketGuard<A> {
    fn drop(&mut self) {
        let mut slot = lock(&self.inner.inflight);
        // A newer ticket is not ours to remove.
        if slot.as_ref().is_some_and(|inflight| inflight.id == self.id) {
            *slot = None;
        }
    }
}

/// Trades the refresh credential for a new access token, one exchange at
/// a time.
///
/// Cheap to clone; clones share the ticket.
pub struct RefreshCoordinator<A: AuthApi> {
    inner: Arc<CoordinatorInner<A>>,
}

impl<A: AuthApi> Clone for RefreshCoordinator<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: AuthApi> RefreshCoordinator<A> {
    pub fn new(
        api: A,
        store: TokenStore,
        credential: RefreshHandle,
        sync: AuthSync,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                api,
                store,
                credential,
                sync,
                inflight: Mutex::new(None),
                next_id: AtomicU64::new(1),
                exchanges: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a fresh access token, or `None` if the session could not be
    /// renewed (in which case it has been purged).
    ///
    /// Concurrent callers share one exchange and all get its result. With
    /// no refresh credential at all the session is purged and this returns
    /// `None` without touching the network. An exchange that finishes
    /// after the session was cleared resolves `None` and changes nothing.
    pub async fn refresh(&self) -> Option<String> {
        let ticket = {
            let mut slot = lock(&self.inner.inflight);
            match slot.as_ref() {
                Some(inflight) => {
                    debug!(id = inflight.id, "joining in-flight refresh");
                    inflight.ticket.clone()
                }
                None => {
                    let Some(credential) = self.inner.credential.get() else {
                        debug!("no refresh credential, purging session");
                        self.inner.store.purge(&self.inner.credential);
                        return None;
                    };
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let epoch = self.inner.store.epoch();
                    let ticket = self.start_exchange(id, epoch, credential);
                    *slot = Some(InFlight {
                        id,
                        ticket: ticket.clone(),
                    });
                    ticket
                }
            }
        };
        ticket.await
    }

    fn start_exchange(&self, id: u64, epoch: u64, credential: RefreshCredential) -> Ticket {
        let guard = TicketGuard {
            inner: Arc::clone(&self.inner),
            id,
        };
        let task = tokio::spawn(async move {
            let result = guard.inner.exchange(epoch, credential).await;
            drop(guard);
            result
        });
        async move {
            task.await.unwrap_or_else(|e| {
                warn!(error = %e, "refresh task did not complete");
                None
            })
        }
        .boxed()
        .shared()
    }

    /// Arms the renewal alarm for the current token, with `refresh` as the
    /// callback.
    pub fn schedule_renewal(&self) -> Renewal {
        self.inner.schedule_renewal()
    }

    /// Whether an exchange is in flight right now.
    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.inflight).is_some()
    }

    /// Number of network exchanges started so far.
    pub fn exchanges(&self) -> u64 {
        self.inner.exchanges.load(Ordering::Relaxed)
    }

    pub fn api(&self) -> &A {
        &self.inner.api
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub fn credential(&self) -> &RefreshHandle {
        &self.inner.credential
    }

    pub fn sync(&self) -> &AuthSync {
        &self.inner.sync
    }
}

impl<A: AuthApi> CoordinatorInner<A> {
    async fn exchange(self: &Arc<Self>, epoch: u64, credential: RefreshCredential) -> Option<String> {
        let n = self.exchanges.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(exchange = n, "refreshing access token");

        let result = self.api.refresh(credential.to_request()).await;
        // Signed out while the exchange was on the wire: the session is
        // gone, whatever the server answered.
        if self.store.epoch() != epoch {
            info!(exchange = n, "session cleared during refresh, discarding result");
            return None;
        }
        match result {
            Ok(info) if !info.access_token.is_empty() => self.adopt(epoch, info),
            Ok(_) => {
                warn!("refresh response carried no access token, purging session");
                self.store.purge(&self.credential);
                None
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, purging session");
                self.store.purge(&self.credential);
                None
            }
        }
    }

    fn adopt(self: &Arc<Self>, epoch: u64, info: AuthInfo) -> Option<String> {
        let AuthInfo {
            access_token,
            refresh_token,
        } = info;

        if !self.store.set_access_token_if_current(access_token.clone(), epoch) {
            info!("session cleared during refresh, discarding result");
            return None;
        }
        if let Some(rotated) = refresh_token.as_deref() {
            if let Err(e) = self.credential.set(rotated) {
                warn!(error = %e, "failed to persist rotated refresh credential");
            }
            // A purge bumps the epoch before it clears the credential, so
            // one that raced the write above is seen here.
            if self.store.epoch() != epoch {
                self.credential.clear();
            }
        }
        self.schedule_renewal();
        if self.store.epoch() != epoch {
            return None;
        }
        self.sync.broadcast_token_refresh(&access_token);
        info!("access token refreshed");
        Some(access_token)
    }

    fn schedule_renewal(self: &Arc<Self>) -> Renewal {
        // Weak: a pending alarm must not keep a torn-down session alive.
        let weak = Arc::downgrade(self);
        self.store.schedule_renewal(move || async move {
            if let Some(inner) = weak.upgrade() {
                RefreshCoordinator { inner }.refresh().await;
            }
        })
    }
}
