//! The token store: a tab's in-memory access token and its renewal alarm.
//!
//! Every request needs the current token, so the store is shared state by
//! necessity. It is still an ordinary value: built once per tab, and handed
//! (as a cheap clone) to every collaborator that needs it.
//!
//! All methods are synchronous. A write is visible to every reader as soon
//! as the call returns, and checking-then-mutating the renewal alarm never
//! crosses an `.await`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mailroom_timer::{RenewalTimer, TimerConfig};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::claims;
use crate::{ExpiredTokenPolicy, RefreshHandle, SessionConfig};

/// What [`TokenStore::schedule_renewal`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// An alarm fires after `delay`.
    Armed { delay: Duration },
    /// The token had no time left and the callback was armed to run now.
    Immediate,
    /// Nothing armed: no token, or an expired token under the reactive
    /// policy.
    Skipped,
}

struct StoreInner {
    token: watch::Sender<Option<String>>,
    /// Bumped by every clear; only written under the `token` lock.
    epoch: AtomicU64,
    renewal: RenewalTimer,
    safety_margin: Duration,
    expired_policy: ExpiredTokenPolicy,
}

/// Holder of the current access token.
///
/// Cloning is cheap and every clone sees the same state.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<StoreInner>,
}

impl TokenStore {
    pub fn new(config: &SessionConfig) -> Self {
        let (token, _) = watch::channel(None);
        Self {
            inner: Arc::new(StoreInner {
                token,
                epoch: AtomicU64::new(0),
                renewal: RenewalTimer::new(TimerConfig {
                    jitter_max: config.renewal_jitter,
                }),
                safety_margin: config.safety_margin,
                expired_policy: config.expired_token_policy,
            }),
        }
    }

    /// The current access token.
    pub fn access_token(&self) -> Option<String> {
        self.inner.token.borrow().clone()
    }

    pub fn has_access_token(&self) -> bool {
        self.inner.token.borrow().is_some()
    }

    /// Replaces the token. Does not schedule a renewal; the caller decides.
    ///
    /// Subscribers are only notified when the value actually changes, so
    /// applying the same token twice is harmless.
    pub fn set_access_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.inner.token.send_if_modified(|current| {
            if current.as_deref() == Some(token.as_str()) {
                return false;
            }
            *current = Some(token);
            true
        });
    }

    /// Sets the token only if the store has not been cleared since
    /// `epoch` was read. Returns whether the token was taken.
    ///
    /// A refresh started before a sign-out uses this so its late result
    /// cannot bring the session back.
    pub fn set_access_token_if_current(&self, token: impl Into<String>, epoch: u64) -> bool {
        let token = token.into();
        let mut taken = false;
        self.inner.token.send_if_modified(|current| {
            if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            taken = true;
            if current.as_deref() == Some(token.as_str()) {
                return false;
            }
            *current = Some(token);
            true
        });
        taken
    }

    /// Cancels any pending renewal and forgets the token. Idempotent.
    ///
    /// Always starts a new [`epoch`](Self::epoch), token or not.
    pub fn clear_access_token(&self) {
        self.inner.renewal.cancel();
        self.inner.token.send_if_modified(|current| {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            current.take().is_some()
        });
    }

    /// How many times the store has been cleared.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Arms the renewal alarm for the current token.
    ///
    /// Any pending renewal is cancelled first, so at most one is ever
    /// armed. The alarm fires `safety_margin` before expiry, or right away
    /// when less than that is left. A token with no time left at all
    /// follows the configured [`ExpiredTokenPolicy`].
    pub fn schedule_renewal<F, Fut>(&self, on_due: F) -> Renewal
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.renewal.cancel();

        let Some(token) = self.access_token() else {
            return Renewal::Skipped;
        };

        let secs_left = claims::seconds_until_expiry(&token);
        if secs_left == 0 {
            return match self.inner.expired_policy {
                ExpiredTokenPolicy::Reactive => {
                    debug!("token has no time left, renewal left to the next 401");
                    Renewal::Skipped
                }
                ExpiredTokenPolicy::RenewNow => {
                    self.inner.renewal.arm(Duration::ZERO, on_due);
                    debug!("token has no time left, renewing now");
                    Renewal::Immediate
                }
            };
        }

        let delay = Duration::from_secs(secs_left)
            .saturating_sub(self.inner.safety_margin);
        self.inner.renewal.arm(delay, on_due);
        info!(
            delay_secs = delay.as_secs(),
            expires_in_secs = secs_left,
            "silent token renewal scheduled"
        );
        Renewal::Armed { delay }
    }

    /// Cancels the pending renewal without touching the token.
    pub fn clear_renewal(&self) -> bool {
        self.inner.renewal.cancel()
    }

    pub fn renewal_armed(&self) -> bool {
        self.inner.renewal.is_armed()
    }

    /// When the pending renewal fires (jitter included), if one is armed.
    pub fn renewal_deadline(&self) -> Option<Instant> {
        self.inner.renewal.deadline()
    }

    /// Watches the token. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.inner.token.subscribe()
    }

    /// Tears the whole session down: renewal, token, and persisted
    /// refresh credential.
    pub fn purge(&self, credential: &RefreshHandle) {
        self.clear_renewal();
        self.clear_access_token();
        credential.clear();
        debug!("session purged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear_access_token() {
        let store = TokenStore::new(&SessionConfig::default());
        assert_eq!(store.access_token(), None);

        store.set_access_token("a.b.c");
        assert_eq!(store.access_token().as_deref(), Some("a.b.c"));

        store.clear_access_token();
        store.clear_access_token();
        assert!(!store.has_access_token());
    }

    #[test]
    fn test_clones_share_state() {
        let store = TokenStore::new(&SessionConfig::default());
        let other = store.clone();
        store.set_access_token("t");
        assert_eq!(other.access_token().as_deref(), Some("t"));
    }

    #[test]
    fn test_subscribe_skips_identical_token() {
        let store = TokenStore::new(&SessionConfig::default());
        let mut rx = store.subscribe();

        store.set_access_token("t");
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        store.set_access_token("t");
        assert!(!rx.has_changed().unwrap());

        store.clear_access_token();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), None);
    }

    #[test]
    fn test_set_access_token_if_current_after_clear_is_refused() {
        let store = TokenStore::new(&SessionConfig::default());
        let epoch = store.epoch();
        assert!(store.set_access_token_if_current("t-1", epoch));
        assert_eq!(store.access_token().as_deref(), Some("t-1"));

        store.clear_access_token();
        assert!(!store.set_access_token_if_current("t-2", epoch));
        assert_eq!(store.access_token(), None);

        assert!(store.set_access_token_if_current("t-3", store.epoch()));
        assert_eq!(store.access_token().as_deref(), Some("t-3"));
    }

    #[test]
    fn test_clear_without_token_still_advances_epoch() {
        let store = TokenStore::new(&SessionConfig::default());
        let before = store.epoch();
        store.clear_access_token();
        assert_eq!(store.epoch(), before + 1);
    }

    #[test]
    fn test_schedule_renewal_without_token_is_skipped() {
        let store = TokenStore::new(&SessionConfig::default());
        assert_eq!(store.schedule_renewal(|| async {}), Renewal::Skipped);
        assert!(!store.renewal_armed());
    }

    #[test]
    fn test_schedule_renewal_malformed_token_is_skipped() {
        let store = TokenStore::new(&SessionConfig::default());
        store.set_access_token("not-a-token");
        assert_eq!(store.schedule_renewal(|| async {}), Renewal::Skipped);
    }
}
