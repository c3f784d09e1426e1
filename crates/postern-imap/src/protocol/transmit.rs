//! Bytes the decoder asks the connection to send on its own.

use bytes::Bytes;

/// Output produced while decoding rather than by a command handler.
///
/// The decoder queues one of these for each synchronizing literal; the
/// connection forwards it to the client before reading the literal data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    data: Bytes,
}

impl Transmit {
    /// Wraps a static message without copying it.
    #[must_use]
    pub const fn from_static(data: &'static [u8]) -> Self {
        Self {
            data: Bytes::from_static(data),
        }
    }

    /// Returns the data as text, if it is valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

impl AsRef<[u8]> for Transmit {
    fn as_ref(&self) -> &[u8] {
        &self.data
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
    use crate::parser::LITERAL_CONTINUATION;

    #[test]
    fn continuation_request_is_a_full_line() {
        let t = Transmit::from_static(LITERAL_CONTINUATION.as_bytes());
        assert_eq!(t.as_str(), Some("+ Ready for literal data\r\n"));
        assert!(t.as_ref().ends_with(b"\r\n"));
    }
}
