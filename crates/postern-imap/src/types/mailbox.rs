//! Mailbox types.

use super::{Flags, Uid, UidValidity};

/// Mailbox name.
///
/// `INBOX` is case-insensitive, so any spelling of it is normalized to the
/// upper-case form on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mailbox(String);

impl Mailbox {
    /// Creates a new mailbox name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.eq_ignore_ascii_case("INBOX") {
            Self::inbox()
        } else {
            Self(name)
        }
    }

    /// The INBOX mailbox.
    #[must_use]
    pub fn inbox() -> Self {
        Self("INBOX".to_string())
    }

    /// Returns the mailbox name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mailbox status reported by the store on SELECT/EXAMINE.
#[derive(Debug, Clone)]
pub struct MailboxStatus {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// First unseen message sequence number.
    pub unseen: Option<u32>,
    /// Next UID to be assigned.
    pub uid_next: Uid,
    /// UIDVALIDITY value.
    pub uid_validity: UidValidity,
    /// Flags defined for this mailbox.
    pub flags: Flags,
    /// Flags that can be permanently stored.
    pub permanent_flags: Flags,
    /// Whether mailbox is read-only.
    pub read_only: bool,
}

/// One entry of a LIST response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Mailbox attributes.
    pub attributes: Vec<MailboxAttribute>,
    /// Hierarchy delimiter.
    pub delimiter: Option<char>,
    /// Mailbox name.
    pub mailbox: Mailbox,
}

/// Mailbox attributes reported in LIST responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxAttribute {
    /// Mailbox cannot be selected.
    NoSelect,
    /// Mailbox has no children.
    HasNoChildren,
    /// Mailbox has children.
    HasChildren,
    /// Mailbox is marked for attention.
    Marked,
    /// Mailbox is not marked.
    Unmarked,
    /// Mailbox is the drafts folder.
    Drafts,
    /// Mailbox is the sent folder.
    Sent,
    /// Mailbox is the trash folder.
    Trash,
}

impl MailboxAttribute {
    /// Returns the attribute as written in a LIST response.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoSelect => "\\Noselect",
            Self::HasNoChildren => "\\HasNoChildren",
            Self::HasChildren => "\\HasChildren",
            Self::Marked => "\\Marked",
            Self::Unmarked => "\\Unmarked",
            Self::Drafts => "\\Drafts",
            Self::Sent => "\\Sent",
            Self::Trash => "\\Trash",
        }
    }
}

impl std::fmt::Display for MailboxAttribute {
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
    fn inbox_is_normalized() {
        assert_eq!(Mailbox::new("inbox"), Mailbox::inbox());
        assert_eq!(Mailbox::new("InBoX").as_str(), "INBOX");
    }

    #[test]
    fn other_names_keep_case() {
        let mb = Mailbox::new("Archive/2024");
        assert_eq!(mb.as_str(), "Archive/2024");
        assert_eq!(format!("{mb}"), "Archive/2024");
        assert_ne!(Mailbox::new("sent"), Mailbox::new("Sent"));
    }

    #[test]
    fn attribute_display() {
        assert_eq!(MailboxAttribute::NoSelect.to_string(), "\\Noselect");
        assert_eq!(MailboxAttribute::HasChildren.to_string(), "\\HasChildren");
    }
}
