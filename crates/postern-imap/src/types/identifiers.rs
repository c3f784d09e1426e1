//! Core IMAP identifiers.
//!
//! Types for client tags, UIDs, and UIDVALIDITY.

use std::num::NonZeroU32;

/// IMAP command tag.
///
/// Every client command starts with a tag. The server echoes it in the
/// tagged completion response so the client can correlate the two.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    /// Creates a tag, returning `None` if it is empty or contains a byte
    /// that cannot appear in a tag.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Option<Self> {
        let tag = tag.into();
        if !tag.is_empty() && tag.bytes().all(is_tag_char) {
            Some(Self(tag))
        } else {
            None
        }
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns true if `b` may appear in a tag (any ASTRING-CHAR except `+`).
#[must_use]
pub const fn is_tag_char(b: u8) -> bool {
    matches!(b, 0x21..=0x7e)
        && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\' | b'+')
}

/// Unique identifier for a message.
///
/// UIDs are persistent identifiers that don't change when messages are expunged.
/// Combined with `UIDVALIDITY`, they uniquely identify a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub NonZeroU32);

impl Uid {
    /// The smallest valid UID.
    pub const MIN: Self = Self(NonZeroU32::MIN);

    /// Creates a new UID.
    ///
    /// Returns `None` if the value is 0.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UIDVALIDITY value for a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UidValidity(pub NonZeroU32);

impl UidValidity {
    /// The smallest valid UIDVALIDITY.
    pub const MIN: Self = Self(NonZeroU32::MIN);

    /// Creates a new UIDVALIDITY.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for UidValidity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
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

    mod tag_tests {
        use super::*;

        #[test]
        fn new_valid() {
            let tag = Tag::new("A001").unwrap();
            assert_eq!(tag.as_str(), "A001");
            assert_eq!(format!("{tag}"), "A001");
        }

        #[test]
        fn rejects_empty() {
            assert!(Tag::new("").is_none());
        }

        #[test]
        fn rejects_plus_and_specials() {
            assert!(Tag::new("a+1").is_none());
            assert!(Tag::new("a*").is_none());
            assert!(Tag::new("a b").is_none());
            assert!(Tag::new("{1}").is_none());
        }

        #[test]
        fn allows_brackets_and_dots() {
            assert!(Tag::new("a.1]").is_some());
        }
    }

    mod uid_tests {
        use super::*;

        #[test]
        fn new_zero_returns_none() {
            assert!(Uid::new(0).is_none());
        }

        #[test]
        fn ordering_and_display() {
            let uid1 = Uid::new(100).unwrap();
            let uid2 = Uid::new(200).unwrap();
            assert!(uid1 < uid2);
            assert_eq!(uid2.to_string(), "200");
        }
    }

    #[test]
    fn uid_validity_display() {
        let uv = UidValidity::new(987654321).unwrap();
        assert_eq!(uv.get(), 987654321);
        assert_eq!(uv.to_string(), "987654321");
        assert!(UidValidity::new(0).is_none());
    }
}
