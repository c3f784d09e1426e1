//! Client commands as decoded from the wire.

mod types;

use bytes::Bytes;

use crate::types::{Flags, Mailbox, SequenceSet, Tag};

pub use types::{FetchAttribute, FetchItems, SearchCriteria, Section};

/// A tagged client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Tag to echo in the completion response.
    pub tag: Tag,
    /// Command name and arguments.
    pub body: CommandBody,
}

/// IMAP command name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBody {
    // Any State Commands
    /// CAPABILITY command.
    Capability,
    /// NOOP command.
    Noop,
    /// LOGOUT command.
    Logout,

    // Not Authenticated State Commands
    /// STARTTLS command.
    StartTls,
    /// LOGIN command.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// AUTHENTICATE command.
    Authenticate {
        /// SASL mechanism name, upper-cased.
        mechanism: String,
        /// SASL-IR initial response, still base64 encoded (`=` for empty).
        initial_response: Option<String>,
    },

    // Authenticated State Commands
    /// SELECT command.
    Select {
        /// Mailbox to select.
        mailbox: Mailbox,
    },
    /// EXAMINE command (read-only SELECT).
    Examine {
        /// Mailbox to examine.
        mailbox: Mailbox,
    },
    /// LIST command.
    List {
        /// Reference name.
        reference: String,
        /// Mailbox pattern with `*` and `%` wildcards.
        pattern: String,
    },
    /// APPEND command.
    Append {
        /// Destination mailbox.
        mailbox: Mailbox,
        /// Flags for the new message.
        flags: Flags,
        /// Internal date, as sent.
        date: Option<String>,
        /// Message content.
        message: Bytes,
    },
    /// IDLE command (RFC 2177).
    Idle,
    /// COMPRESS command (RFC 4978).
    Compress {
        /// Compression mechanism, upper-cased.
        mechanism: String,
    },

    // Selected State Commands
    /// CHECK command.
    Check,
    /// CLOSE command.
    Close,
    /// UNSELECT command (RFC 3691).
    Unselect,
    /// FETCH or UID FETCH.
    Fetch {
        /// Messages to fetch.
        sequence_set: SequenceSet,
        /// Items to return.
        items: FetchItems,
        /// Whether the set holds UIDs.
        uid: bool,
    },
    /// SEARCH or UID SEARCH.
    Search {
        /// Search criteria, combined with AND.
        criteria: SearchCriteria,
        /// Whether results are UIDs.
        uid: bool,
    },

    /// A command this server does not implement.
    Unknown {
        /// Command name as sent.
        name: String,
    },
}

impl CommandBody {
    /// Returns the command name for logging.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Noop => "NOOP",
            Self::Logout => "LOGOUT",
            Self::StartTls => "STARTTLS",
            Self::Login { .. } => "LOGIN",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::Select { .. } => "SELECT",
            Self::Examine { .. } => "EXAMINE",
            Self::List { .. } => "LIST",
            Self::Append { .. } => "APPEND",
            Self::Idle => "IDLE",
            Self::Compress { .. } => "COMPRESS",
            Self::Check => "CHECK",
            Self::Close => "CLOSE",
            Self::Unselect => "UNSELECT",
            Self::Fetch { uid: false, .. } => "FETCH",
            Self::Fetch { uid: true, .. } => "UID FETCH",
            Self::Search { uid: false, .. } => "SEARCH",
            Self::Search { uid: true, .. } => "UID SEARCH",
            Self::Unknown { name } => name,
        }
    }
}
