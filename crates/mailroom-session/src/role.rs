//! Role predicates over the current access token.

use crate::{TokenStore, claims};

/// Reads the role claim of whatever token the store holds right now.
///
/// Nothing is cached: a role check made just after a `TOKEN_REFRESH`
/// already sees the new token.
#[derive(Clone)]
pub struct RoleGate {
    store: TokenStore,
}

impl RoleGate {
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }

    /// The current role, or `None` when signed out or the token has none.
    pub fn current_role(&self) -> Option<String> {
        self.store
            .access_token()
            .and_then(|token| claims::role_of(&token))
    }

    /// Exact match against the current role.
    pub fn has_role(&self, required: &str) -> bool {
        self.current_role().is_some_and(|role| role == required)
    }

    /// Whether the current role is one of `roles`.
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.current_role()
            .is_some_and(|role| roles.contains(&role.as_str()))
    }

    /// Picks `shown` when the user has `required`, `fallback` otherwise.
    ///
    /// ```ignore
    /// let menu = gate.reveal("admin", admin_menu, None);
    /// ```
    pub fn reveal<T>(&self, required: &str, shown: T, fallback: T) -> T {
        if self.has_role(required) { shown } else { fallback }
    }

    /// Like [`reveal`](Self::reveal), for a set of accepted roles.
    pub fn reveal_any<T>(&self, roles: &[&str], shown: T, fallback: T) -> T {
        if self.has_any_role(roles) { shown } else { fallback }
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;
    use crate::SessionConfig;

    fn gate_with_role(role: Option<&str>) -> RoleGate {
        let store = TokenStore::new(&SessionConfig::default());
        if let Some(role) = role {
            let payload =
                URL_SAFE_NO_PAD.encode(format!(r#"{{"role":"{role}"}}"#));
            store.set_access_token(format!("h.{payload}.s"));
        }
        RoleGate::new(store)
    }

    #[test]
    fn test_has_role_exact_match_only() {
        let gate = gate_with_role(Some("admin"));
        assert!(gate.has_role("admin"));
        assert!(!gate.has_role("Admin"));
        assert!(!gate.has_role("user"));
    }

    #[test]
    fn test_has_any_role_membership() {
        let gate = gate_with_role(Some("moderator"));
        assert!(gate.has_any_role(&["admin", "moderator"]));
        assert!(!gate.has_any_role(&["admin"]));
        assert!(!gate.has_any_role(&[]));
    }

    #[test]
    fn test_signed_out_has_no_role() {
        let gate = gate_with_role(None);
        assert_eq!(gate.current_role(), None);
        assert!(!gate.has_role("user"));
        assert!(!gate.has_any_role(&["user"]));
    }

    #[test]
    fn test_reveal_selects_fragment() {
        let gate = gate_with_role(Some("user"));
        assert_eq!(gate.reveal("admin", "panel", "nothing"), "nothing");
        assert_eq!(gate.reveal_any(&["user", "admin"], 1, 0), 1);
    }
}
