//! Response writing.
//!
//! Handlers never touch the socket. They write responses through a
//! [`ResponseWriter`], which the transport pipeline implements by
//! buffering application bytes until the connection flushes them. Every
//! provided method formats into bytes and hands them to
//! [`ResponseWriter::write_bytes`], so an implementation only has to
//! decide where those bytes go.

pub mod encode;

use crate::Result;
use crate::fetch::FetchResponse;
use crate::types::{ResponseCode, Status, Tag};

/// Sink for server responses.
pub trait ResponseWriter {
    /// Appends raw, already-encoded response bytes.
    fn write_bytes(&mut self, data: &[u8]);

    /// Pushes buffered bytes towards the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if an encoding stage fails.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Writes a tagged completion response.
    fn write_tagged(&mut self, tag: &Tag, status: Status, code: Option<&ResponseCode>, text: &str) {
        let mut buf = Vec::new();
        encode::write_tagged(&mut buf, tag, status, code, text);
        self.write_bytes(&buf);
    }

    /// Writes an untagged status response such as `* OK [UIDNEXT 5] ...`.
    fn write_status(&mut self, status: Status, code: Option<&ResponseCode>, text: &str) {
        let mut buf = Vec::new();
        encode::write_untagged_status(&mut buf, status, code, text);
        self.write_bytes(&buf);
    }

    /// Writes an untagged data response: `* <text>`.
    fn write_untagged(&mut self, text: &str) {
        let mut buf = Vec::new();
        encode::write_untagged(&mut buf, text);
        self.write_bytes(&buf);
    }

    /// Writes a continuation request: `+ <text>`.
    fn write_continuation(&mut self, text: &str) {
        let mut buf = Vec::new();
        encode::write_continuation(&mut buf, text);
        self.write_bytes(&buf);
    }

    /// Writes a literal, `{n}` CRLF and the data.
    fn write_literal(&mut self, data: &[u8]) {
        let mut buf = Vec::new();
        encode::write_literal(&mut buf, data);
        self.write_bytes(&buf);
    }

    /// Writes a complete `* n FETCH (...)` response.
    fn write_fetch(&mut self, response: &FetchResponse) {
        let mut buf = Vec::new();
        response.encode(&mut buf);
        self.write_bytes(&buf);
    }
}

/// A writer that records everything written, for inspection.
///
/// Useful for testing handlers without a transport.
#[derive(Debug, Default, Clone)]
pub struct RecordingWriter {
    /// Bytes written so far.
    pub output: Vec<u8>,
    /// Number of times `flush` was called.
    pub flushes: usize,
}

impl RecordingWriter {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the output as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Returns the CRLF-separated lines written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.text()
            .split("\r\n")
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Takes the recorded output, leaving the recorder empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}

impl ResponseWriter for RecordingWriter {
    fn write_bytes(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data);
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
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
    fn recording_writer_collects_lines() {
        let mut out = RecordingWriter::new();
        out.write_untagged("CAPABILITY IMAP4rev1");
        out.write_continuation("idling");
        out.write_tagged(&Tag::new("a").unwrap(), Status::Bad, None, "nope");
        out.flush().unwrap();

        assert_eq!(
            out.lines(),
            vec!["* CAPABILITY IMAP4rev1", "+ idling", "a BAD nope"]
        );
        assert_eq!(out.flushes, 1);
        assert!(!out.take().is_empty());
        assert!(out.output.is_empty());
    }

    #[test]
    fn status_and_literal() {
        let mut out = RecordingWriter::new();
        out.write_status(Status::Ok, Some(&ResponseCode::Closed), "previous mailbox closed");
        out.write_literal(b"ab");
        assert_eq!(out.text(), "* OK [CLOSED] previous mailbox closed\r\n{2}\r\nab");
    }
}
