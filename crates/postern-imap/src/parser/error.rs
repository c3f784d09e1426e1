//! Decoder and parser errors.

use thiserror::Error;

use crate::types::Tag;

/// A framed command that does not match the grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected} at position {position}")]
pub struct ParseError {
    /// Tag of the offending command, if it could be read.
    pub tag: Option<Tag>,
    /// Byte offset within the command.
    pub position: usize,
    /// What the parser was looking for.
    pub expected: String,
}

/// Errors produced by the incremental decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A line outside literals exceeded the configured maximum. Fatal.
    #[error("command line of {length} bytes exceeds the limit")]
    LineTooLong {
        /// Tag of the command, if the line started with one.
        tag: Option<Tag>,
        /// Bytes seen so far on the line.
        length: usize,
    },

    /// A synchronizing literal was larger than allowed. The client has not
    /// sent the data yet, so the command can be refused and skipped.
    #[error("literal of {size} bytes refused")]
    LiteralRejected {
        /// Tag of the command.
        tag: Option<Tag>,
        /// Announced size.
        size: usize,
        /// Bytes to discard, up to and including the literal header line.
        consumed: usize,
    },

    /// A non-synchronizing literal was larger than allowed. Fatal, since
    /// the client is already streaming the data.
    #[error("non-synchronizing literal of {size} bytes exceeds the limit")]
    LiteralTooLarge {
        /// Tag of the command.
        tag: Option<Tag>,
        /// Announced size.
        size: usize,
    },

    /// The command was completely received but could not be parsed.
    #[error("syntax error: {error}")]
    Syntax {
        /// Parser diagnostics.
        error: ParseError,
        /// Length of the rejected command, including literals.
        consumed: usize,
    },
}

impl DecodeError {
    /// Returns true if the connection cannot continue.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::LineTooLong { .. } | Self::LiteralTooLarge { .. })
    }

    /// Returns the tag of the offending command, if known.
    #[must_use]
    pub const fn tag(&self) -> Option<&Tag> {
        match self {
            Self::LineTooLong { tag, .. }
            | Self::LiteralRejected { tag, .. }
            | Self::LiteralTooLarge { tag, .. } => tag.as_ref(),
            Self::Syntax { error, .. } => error.tag.as_ref(),
        }
    }

    /// Returns how many bytes to skip to recover, for non-fatal errors.
    #[must_use]
    pub const fn consumed(&self) -> Option<usize> {
        match self {
            Self::LiteralRejected { consumed, .. } | Self::Syntax { consumed, .. } => {
                Some(*consumed)
            }
            Self::LineTooLong { .. } | Self::LiteralTooLarge { .. } => None,
        }
    }
}
