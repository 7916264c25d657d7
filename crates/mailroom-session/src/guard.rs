//! Route entry hooks.
//!
//! Run before a view renders. They never navigate themselves; they return
//! a [`RouteDecision`] and the router acts on it.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::{error, warn};

use crate::{AuthApi, RefreshCoordinator, RoleGate, Routes};

/// Outcome of a route guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Render the view.
    Proceed,
    /// Go to this path instead.
    Redirect(String),
}

impl RouteDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Guards protected and guest-only routes.
pub struct RouteGuard<A: AuthApi> {
    coordinator: RefreshCoordinator<A>,
    roles: RoleGate,
    routes: Routes,
}

impl<A: AuthApi> Clone for RouteGuard<A> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            roles: self.roles.clone(),
            routes: self.routes.clone(),
        }
    }
}

impl<A: AuthApi> RouteGuard<A> {
    pub fn new(coordinator: RefreshCoordinator<A>, routes: Routes) -> Self {
        let roles = RoleGate::new(coordinator.store().clone());
        Self {
            coordinator,
            roles,
            routes,
        }
    }

    /// Makes sure the tab holds an access token, and optionally one of
    /// `required_roles`.
    ///
    /// 1. No token: refresh once if a refresh credential exists, else
    ///    redirect to sign-in without any network call.
    /// 2. Token without an accepted role: redirect to the unauthorized
    ///    fallback. The user is signed in, just not allowed here.
    /// 3. Otherwise proceed.
    ///
    /// A panic anywhere in the check fails closed to sign-in.
    pub async fn ensure_auth_for_route(&self, required_roles: &[&str]) -> RouteDecision {
        match AssertUnwindSafe(self.check(required_roles))
            .catch_unwind()
            .await
        {
            Ok(decision) => decision,
            Err(_) => {
                error!("route guard failed, redirecting to sign-in");
                self.sign_in()
            }
        }
    }

    async fn check(&self, required_roles: &[&str]) -> RouteDecision {
        let store = self.coordinator.store();
        if !store.has_access_token() {
            if !self.coordinator.credential().is_present() {
                return self.sign_in();
            }
            if self.coordinator.refresh().await.is_none() {
                return self.sign_in();
            }
        }

        if !required_roles.is_empty() && !self.roles.has_any_role(required_roles) {
            warn!(
                required = ?required_roles,
                role = ?self.roles.current_role(),
                "missing required role"
            );
            return RouteDecision::Redirect(self.routes.unauthorized.clone());
        }

        RouteDecision::Proceed
    }

    /// Entry hook of the authenticated layout.
    ///
    /// Same as [`ensure_auth_for_route`](Self::ensure_auth_for_route), and
    /// an authenticated user who lands on an auth page goes home.
    pub async fn enter_protected(&self, path: &str, required_roles: &[&str]) -> RouteDecision {
        match self.ensure_auth_for_route(required_roles).await {
            RouteDecision::Proceed if self.routes.is_auth_page(path) => {
                RouteDecision::Redirect(self.routes.home.clone())
            }
            decision => decision,
        }
    }

    /// Entry hook of the sign-in and sign-up pages.
    ///
    /// A user who is already authenticated (or can silently become so)
    /// goes home instead.
    pub async fn ensure_guest_for_route(&self) -> RouteDecision {
        match self.ensure_auth_for_route(&[]).await {
            RouteDecision::Proceed => RouteDecision::Redirect(self.routes.home.clone()),
            RouteDecision::Redirect(_) => RouteDecision::Proceed,
        }
    }

    pub fn roles(&self) -> &RoleGate {
        &self.roles
    }

    fn sign_in(&self) -> RouteDecision {
        RouteDecision::Redirect(self.routes.sign_in.clone())
    }
}
