//! Command argument types.

use crate::types::SequenceSet;

/// FETCH items requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItems {
    /// `ALL` macro (FLAGS INTERNALDATE RFC822.SIZE ENVELOPE).
    All,
    /// `FAST` macro (FLAGS INTERNALDATE RFC822.SIZE).
    Fast,
    /// Explicit list of items.
    Items(Vec<FetchAttribute>),
}

impl FetchItems {
    /// Expands macros into the individual attributes, in response order.
    #[must_use]
    pub fn attributes(&self) -> Vec<FetchAttribute> {
        match self {
            Self::All => vec![
                FetchAttribute::Flags,
                FetchAttribute::InternalDate,
                FetchAttribute::Rfc822Size,
                FetchAttribute::Envelope,
            ],
            Self::Fast => vec![
                FetchAttribute::Flags,
                FetchAttribute::InternalDate,
                FetchAttribute::Rfc822Size,
            ],
            Self::Items(items) => items.clone(),
        }
    }

    /// Returns the items with `UID` added, as UID FETCH requires.
    #[must_use]
    pub fn with_uid(&self) -> Self {
        let mut items = self.attributes();
        if !items.contains(&FetchAttribute::Uid) {
            items.insert(0, FetchAttribute::Uid);
        }
        Self::Items(items)
    }

    /// Returns true if answering requires the message content, not only
    /// its metadata.
    #[must_use]
    pub fn needs_content(&self) -> bool {
        self.attributes().iter().any(|a| {
            matches!(
                a,
                FetchAttribute::Envelope
                    | FetchAttribute::Body { .. }
                    | FetchAttribute::Rfc822
                    | FetchAttribute::Rfc822Header
                    | FetchAttribute::Rfc822Text
            )
        })
    }
}

/// Individual FETCH attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// Message flags.
    Flags,
    /// Internal date.
    InternalDate,
    /// RFC822 size.
    Rfc822Size,
    /// Envelope structure.
    Envelope,
    /// UID.
    Uid,
    /// `BODY[section]<partial>` or `BODY.PEEK[...]`.
    Body {
        /// Section specifier.
        section: Section,
        /// Peek (don't set \Seen).
        peek: bool,
        /// Partial fetch as (origin, length).
        partial: Option<(u32, u32)>,
    },
    /// RFC822 (full message).
    Rfc822,
    /// RFC822.HEADER.
    Rfc822Header,
    /// RFC822.TEXT.
    Rfc822Text,
}

/// Body section specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    /// `BODY[]`: the whole message.
    Full,
    /// `BODY[HEADER]`.
    Header,
    /// `BODY[TEXT]`.
    Text,
    /// `BODY[HEADER.FIELDS (...)]`.
    HeaderFields(Vec<String>),
    /// `BODY[HEADER.FIELDS.NOT (...)]`.
    HeaderFieldsNot(Vec<String>),
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => Ok(()),
            Self::Header => f.write_str("HEADER"),
            Self::Text => f.write_str("TEXT"),
            Self::HeaderFields(fields) => write!(f, "HEADER.FIELDS ({})", fields.join(" ")),
            Self::HeaderFieldsNot(fields) => {
                write!(f, "HEADER.FIELDS.NOT ({})", fields.join(" "))
            }
        }
    }
}

/// SEARCH criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    /// All messages.
    All,
    /// Messages with \Answered flag.
    Answered,
    /// Messages without \Answered flag.
    Unanswered,
    /// Messages with \Deleted flag.
    Deleted,
    /// Messages without \Deleted flag.
    Undeleted,
    /// Messages with \Draft flag.
    Draft,
    /// Messages with \Flagged flag.
    Flagged,
    /// Messages without \Flagged flag.
    Unflagged,
    /// Messages with \Recent but not \Seen.
    New,
    /// Messages with \Seen flag.
    Seen,
    /// Messages without \Seen flag.
    Unseen,
    /// Sequence number set.
    SequenceSet(SequenceSet),
    /// UID set.
    UidSet(SequenceSet),
    /// Subject contains text.
    Subject(String),
    /// From contains text.
    From(String),
    /// To contains text.
    To(String),
    /// Cc contains text.
    Cc(String),
    /// Bcc contains text.
    Bcc(String),
    /// Body contains text.
    Body(String),
    /// Text in header or body.
    Text(String),
    /// Internal date on or after the given date.
    Since(String),
    /// Internal date before the given date.
    Before(String),
    /// Internal date on the given date.
    On(String),
    /// Larger than size.
    Larger(u32),
    /// Smaller than size.
    Smaller(u32),
    /// Header field contains value.
    Header(String, String),
    /// AND of criteria.
    And(Vec<Self>),
    /// OR of criteria.
    Or(Box<Self>, Box<Self>),
    /// NOT of criteria.
    Not(Box<Self>),
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
    fn macros_expand() {
        assert_eq!(FetchItems::Fast.attributes().len(), 3);
        assert!(FetchItems::All.attributes().contains(&FetchAttribute::Envelope));
    }

    #[test]
    fn with_uid_adds_uid_once() {
        let items = FetchItems::Items(vec![FetchAttribute::Flags]).with_uid();
        assert_eq!(
            items,
            FetchItems::Items(vec![FetchAttribute::Uid, FetchAttribute::Flags])
        );
        assert_eq!(items.with_uid(), items);
    }

    #[test]
    fn content_requirement() {
        assert!(!FetchItems::Fast.needs_content());
        assert!(FetchItems::All.needs_content());
        let body = FetchItems::Items(vec![FetchAttribute::Body {
            section: Section::Header,
            peek: true,
            partial: None,
        }]);
        assert!(body.needs_content());
    }

    #[test]
    fn section_display() {
        assert_eq!(Section::Full.to_string(), "");
        assert_eq!(
            Section::HeaderFields(vec!["FROM".into(), "SUBJECT".into()]).to_string(),
            "HEADER.FIELDS (FROM SUBJECT)"
        );
    }
}
