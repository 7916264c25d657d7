//! User-visible notices raised by the request path.

use std::fmt;

/// Something the UI should tell the user about, outside any single call's
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// The session could not be renewed; the user must sign in again.
    SessionExpired,
    /// A request got no response at all.
    Connectivity,
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Self::SessionExpired => "Session expired",
            Self::Connectivity => "Network error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SessionExpired => "Please log in again.",
            Self::Connectivity => "Please check your connection and try again.",
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title(), self.description())
    }
}
