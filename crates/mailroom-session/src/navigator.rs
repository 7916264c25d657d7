//! The tab's location bar.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Reads and changes the tab's current path.
///
/// Cross-tab logout and the 401 handler navigate on their own; everything
/// else returns a [`RouteDecision`](crate::RouteDecision) and lets the
/// router act on it.
pub trait Navigator: Send + Sync + 'static {
    /// The path currently shown, e.g. `/inbox`.
    fn current_path(&self) -> String;

    /// Moves the tab to `path`.
    fn navigate(&self, path: &str);
}

#[derive(Debug)]
struct LocationState {
    path: String,
    history: Vec<String>,
}

fn lock(state: &Mutex<LocationState>) -> MutexGuard<'_, LocationState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory [`Navigator`] that records every navigation.
///
/// Cheap to clone; clones share the same location.
#[derive(Debug, Clone)]
pub struct Location {
    state: Arc<Mutex<LocationState>>,
}

impl Location {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LocationState {
                path: path.into(),
                history: Vec::new(),
            })),
        }
    }

    /// Paths navigated to so far, oldest first.
    pub fn history(&self) -> Vec<String> {
        lock(&self.state).history.clone()
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for Location {
    fn current_path(&self) -> String {
        lock(&self.state).path.clone()
    }

    fn navigate(&self, path: &str) {
        let mut state = lock(&self.state);
        debug!(from = %state.path, to = path, "navigating");
        state.path = path.to_string();
        state.history.push(path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigate_updates_path_and_history() {
        let location = Location::new("/inbox");
        location.navigate("/log-in");
        assert_eq!(location.current_path(), "/log-in");
        assert_eq!(location.history(), vec!["/log-in".to_string()]);
    }
}
