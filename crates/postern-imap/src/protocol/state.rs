//! Session states.
//!
//! The four connection states of RFC 3501 section 3, seen from the
//! server side.

/// Connection state of an IMAP session.
///
/// ```text
///  NotAuthenticated ── LOGIN/AUTHENTICATE ──► Authenticated
///                                              │        ▲
///                                 SELECT/EXAMINE        CLOSE/UNSELECT
///                                              ▼        │
///                                             Selected ─┘
///  any state ── LOGOUT, error, EOF, timeout ──► LoggedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Waiting for credentials.
    ///
    /// Valid commands: CAPABILITY, NOOP, LOGOUT, STARTTLS, LOGIN,
    /// AUTHENTICATE.
    #[default]
    NotAuthenticated,

    /// Logged in, no mailbox open.
    ///
    /// Adds SELECT, EXAMINE, LIST, APPEND, IDLE and COMPRESS.
    Authenticated,

    /// A mailbox is open.
    ///
    /// Adds CHECK, CLOSE, UNSELECT, FETCH and SEARCH.
    Selected,

    /// The session has ended. No transition leaves this state.
    LoggedOut,
}

impl SessionState {
    /// Returns `true` in Authenticated and Selected.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::Selected)
    }

    /// Returns `true` if a mailbox is selected.
    #[must_use]
    pub const fn is_selected(self) -> bool {
        matches!(self, Self::Selected)
    }

    /// Name used in responses and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not authenticated",
            Self::Authenticated => "authenticated",
            Self::Selected => "selected",
            Self::LoggedOut => "logout",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_default() {
        assert_eq!(SessionState::default(), SessionState::NotAuthenticated);
    }

    #[test]
    fn test_is_authenticated() {
        assert!(!SessionState::NotAuthenticated.is_authenticated());
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(SessionState::Selected.is_authenticated());
        assert!(!SessionState::LoggedOut.is_authenticated());
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::NotAuthenticated.to_string(), "not authenticated");
        assert_eq!(SessionState::Selected.to_string(), "selected");
    }
}
