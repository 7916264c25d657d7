//! Shared fixtures: token builder, scripted auth API, one-tab harness.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use mailroom_protocol::{AuthInfo, RefreshRequest, SignInRequest, SignUpRequest};
use mailroom_session::{
    AuthApi, AuthSync, Location, RefreshCoordinator, RefreshHandle, RouteGuard,
    SessionConfig, SessionError, TokenStore,
};
use mailroom_transport::{Origin, Tab};

// =========================================================================
// Tokens
// =========================================================================

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs() as i64
}

/// An unsigned token expiring `expires_in` seconds from now.
pub fn token(expires_in: i64, role: Option<&str>) -> String {
    let mut claims = serde_json::json!({
        "sub": "user-1",
        "iat": now_secs(),
        "exp": now_secs() + expires_in,
    });
    if let Some(role) = role {
        claims["role"] = role.into();
    }
    encode(&claims)
}

/// An unsigned token without an `exp` claim.
pub fn token_without_exp(role: &str) -> String {
    encode(&serde_json::json!({ "sub": "user-1", "role": role }))
}

fn encode(claims: &serde_json::Value) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

// =========================================================================
// Scripted auth API
// =========================================================================

#[derive(Debug, Clone)]
pub enum Reply {
    Issue {
        access: String,
        refresh: Option<String>,
    },
    Reject(u16),
    Unreachable,
    Panic,
}

impl Reply {
    pub fn issue(access: impl Into<String>) -> Self {
        Self::Issue {
            access: access.into(),
            refresh: None,
        }
    }

    pub fn rotate(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self::Issue {
            access: access.into(),
            refresh: Some(refresh.into()),
        }
    }
}

/// Answers every auth call from a script, counting calls.
///
/// Replies queued with [`then`](Self::then) are used first, in order;
/// after that every call gets the `always` reply.
pub struct MockAuthApi {
    delay: Duration,
    replies: Mutex<VecDeque<Reply>>,
    always: Reply,
    refresh_calls: AtomicUsize,
    other_calls: AtomicUsize,
    refresh_requests: Mutex<Vec<RefreshRequest>>,
}

impl MockAuthApi {
    pub fn always(reply: Reply) -> Self {
        Self {
            delay: Duration::ZERO,
            replies: Mutex::new(VecDeque::new()),
            always: reply,
            refresh_calls: AtomicUsize::new(0),
            other_calls: AtomicUsize::new(0),
            refresh_requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with `401`.
    pub fn rejecting() -> Self {
        Self::always(Reply::Reject(401))
    }

    pub fn then(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    /// Simulated network latency for every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Every call that would have hit the network.
    pub fn network_calls(&self) -> usize {
        self.refresh_calls() + self.other_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_requests(&self) -> Vec<RefreshRequest> {
        self.refresh_requests.lock().unwrap().clone()
    }

    async fn answer(&self) -> Result<AuthInfo, SessionError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.always.clone());
        match reply {
            Reply::Issue { access, refresh } => Ok(AuthInfo {
                access_token: access,
                refresh_token: refresh,
            }),
            Reply::Reject(status) => Err(SessionError::Rejected {
                status,
                message: "rejected".into(),
            }),
            Reply::Unreachable => {
                Err(SessionError::Unreachable("connection refused".into()))
            }
            Reply::Panic => panic!("auth backend blew up"),
        }
    }
}

impl AuthApi for MockAuthApi {
    async fn sign_in(&self, _: SignInRequest) -> Result<AuthInfo, SessionError> {
        self.other_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await
    }

    async fn sign_up(&self, _: SignUpRequest) -> Result<AuthInfo, SessionError> {
        self.other_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await
    }

    async fn sign_out(&self) -> Result<(), SessionError> {
        self.other_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn refresh(&self, request: RefreshRequest) -> Result<AuthInfo, SessionError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_requests.lock().unwrap().push(request);
        self.answer().await
    }
}

// =========================================================================
// One tab, fully wired
// =========================================================================

pub struct TabSession {
    pub tab: Tab,
    pub store: TokenStore,
    pub credential: RefreshHandle,
    pub location: Location,
    pub sync: AuthSync,
    pub coordinator: RefreshCoordinator<MockAuthApi>,
    pub guard: RouteGuard<MockAuthApi>,
}

impl TabSession {
    /// Opens a tab at `path` with its sync listener running.
    pub fn open(
        origin: &Origin,
        config: SessionConfig,
        api: MockAuthApi,
        path: &str,
    ) -> Self {
        let tab = origin.open_tab();
        let store = TokenStore::new(&config);
        let credential =
            RefreshHandle::new(config.refresh_mode, tab.local_storage());
        let location = Location::new(path);
        let sync = AuthSync::open(
            &tab,
            store.clone(),
            credential.clone(),
            Arc::new(location.clone()),
            config.routes.clone(),
        );
        sync.spawn_listener();
        let coordinator = RefreshCoordinator::new(
            api,
            store.clone(),
            credential.clone(),
            sync.clone(),
        );
        let guard = RouteGuard::new(coordinator.clone(), config.routes.clone());
        Self {
            tab,
            store,
            credential,
            location,
            sync,
            coordinator,
            guard,
        }
    }

    pub fn api(&self) -> &MockAuthApi {
        self.coordinator.api()
    }
}

/// Waits (up to two seconds of runtime time) for `cond` to hold.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Gives every ready task a chance to run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
