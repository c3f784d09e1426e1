//! Incremental command decoder.
//!
//! The decoder is handed the whole unconsumed input buffer on every call
//! and either returns a complete command with the number of bytes it used,
//! or reports that more input is needed. Nothing is consumed on
//! `Incomplete`; the caller appends the next read and tries again.
//!
//! Framing is literal-aware: a line ending in `{n}` or `{n+}` is followed by
//! exactly `n` raw bytes that are never searched for CRLF. Progress made on
//! a partial buffer is remembered in a cursor so retries do not rescan
//! bytes already seen.
//!
//! ```text
//! a1 APPEND INBOX {10}\r\n   Hello\r\nBye   \r\n
//! └──── line segment ─────┘└── literal ──┘└ line ┘
//! ```

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use super::{DecodeError, parse_command};
use crate::command::Command;
use crate::config::Config;
use crate::protocol::Transmit;
use crate::types::{Tag, is_tag_char};

/// Continuation request sent before a synchronizing literal.
pub const LITERAL_CONTINUATION: &str = "+ Ready for literal data\r\n";

/// Outcome of a decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    /// A value was decoded from the first `consumed` bytes.
    Complete {
        /// Decoded value.
        value: T,
        /// Bytes the caller must remove from the front of its buffer.
        consumed: usize,
    },
    /// More input is needed; no bytes were consumed.
    Incomplete(Needed),
}

/// How much more input an incomplete decode needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Needed {
    /// Unknown; waiting for the end of a line.
    Unknown,
    /// At least this many more bytes (the rest of a literal).
    Size(NonZeroUsize),
}

impl Needed {
    fn size(n: usize) -> Self {
        NonZeroUsize::new(n).map_or(Self::Unknown, Self::Size)
    }
}

/// Size limits applied while framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    /// Maximum length of a line segment, excluding literal data.
    pub max_line_length: usize,
    /// Maximum size of one literal.
    pub max_literal_size: usize,
}

impl From<&Config> for DecoderLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_line_length: config.max_line_length,
            max_literal_size: config.max_literal_size,
        }
    }
}

/// Partial progress through the command at the front of the buffer.
///
/// All offsets are relative to the start of the buffer passed to
/// `decode`, which starts at the first unconsumed byte.
#[derive(Debug, Default, Clone, Copy)]
struct DecodeCursor {
    /// Start of the line segment being framed.
    segment_start: usize,
    /// Offset up to which the segment has been searched for CRLF.
    scanned: usize,
    /// End offset of a literal whose data has not fully arrived.
    literal_end: Option<usize>,
    /// Header end of the last literal a continuation was queued for.
    announced: Option<usize>,
    /// Buffer length seen on the previous call.
    observed: usize,
}

enum Framing {
    Complete(usize),
    Incomplete(Needed),
}

struct LiteralHeader {
    size: usize,
    synchronizing: bool,
}

/// Incremental, literal-aware decoder for client commands.
#[derive(Debug)]
pub struct IncrementalDecoder {
    limits: DecoderLimits,
    cursor: DecodeCursor,
    transmits: VecDeque<Transmit>,
}

impl IncrementalDecoder {
    /// Creates a decoder with the given limits.
    #[must_use]
    pub fn new(limits: DecoderLimits) -> Self {
        Self {
            limits,
            cursor: DecodeCursor::default(),
            transmits: VecDeque::new(),
        }
    }

    /// Attempts to decode one command from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`]; see [`DecodeError::is_fatal`] for which
    /// ones the connection can recover from.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Decoded<Command>, DecodeError> {
        let framed = self.frame(buf);
        let len = match framed {
            Ok(Framing::Incomplete(needed)) => return Ok(Decoded::Incomplete(needed)),
            Ok(Framing::Complete(len)) => len,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };
        self.reset();
        match parse_command(&buf[..len]) {
            Ok(value) => Ok(Decoded::Complete {
                value,
                consumed: len,
            }),
            Err(error) => Err(DecodeError::Syntax {
                error,
                consumed: len,
            }),
        }
    }

    /// Frames one raw line without interpreting literals.
    ///
    /// Used while a continuation handler owns the input stream. The
    /// returned line excludes the CRLF.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::LineTooLong`] if no CRLF appears within the
    /// line length limit.
    pub fn decode_line(&mut self, buf: &[u8]) -> Result<Decoded<Vec<u8>>, DecodeError> {
        self.sync(buf);
        let from = self.cursor.scanned;
        match find_crlf(&buf[from..]) {
            Some(rel) => {
                let cr = from + rel;
                self.reset();
                if cr > self.limits.max_line_length {
                    return Err(DecodeError::LineTooLong {
                        tag: None,
                        length: cr,
                    });
                }
                Ok(Decoded::Complete {
                    value: buf[..cr].to_vec(),
                    consumed: cr + 2,
                })
            }
            None if pending_length(buf) > self.limits.max_line_length => {
                self.reset();
                Err(DecodeError::LineTooLong {
                    tag: None,
                    length: pending_length(buf),
                })
            }
            None => {
                self.cursor.scanned = buf.len().saturating_sub(1);
                Ok(Decoded::Incomplete(Needed::Unknown))
            }
        }
    }

    /// Returns the next queued continuation request, if any.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    /// Forgets partial progress. Queued transmits are kept.
    pub fn reset(&mut self) {
        self.cursor = DecodeCursor::default();
    }

    /// Discards the cursor if the caller's buffer no longer matches it.
    fn sync(&mut self, buf: &[u8]) {
        if buf.len() < self.cursor.observed {
            self.cursor = DecodeCursor::default();
        }
        self.cursor.observed = buf.len();
    }

    fn frame(&mut self, buf: &[u8]) -> Result<Framing, DecodeError> {
        self.sync(buf);
        loop {
            if let Some(end) = self.cursor.literal_end {
                if buf.len() < end {
                    return Ok(Framing::Incomplete(Needed::size(end - buf.len())));
                }
                self.cursor.literal_end = None;
                self.cursor.segment_start = end;
                self.cursor.scanned = end;
            }

            let start = self.cursor.segment_start;
            let from = self.cursor.scanned.max(start);
            let Some(rel) = find_crlf(&buf[from..]) else {
                let length = pending_length(&buf[start..]);
                if length > self.limits.max_line_length {
                    return Err(DecodeError::LineTooLong {
                        tag: leading_tag(buf),
                        length,
                    });
                }
                // keep a trailing CR in range for the next attempt
                self.cursor.scanned = buf.len().saturating_sub(1).max(start);
                return Ok(Framing::Incomplete(Needed::Unknown));
            };

            let cr = from + rel;
            let line = &buf[start..cr];
            if line.len() > self.limits.max_line_length {
                return Err(DecodeError::LineTooLong {
                    tag: leading_tag(buf),
                    length: line.len(),
                });
            }
            let line_end = cr + 2;
            let Some(literal) = literal_header(line) else {
                return Ok(Framing::Complete(line_end));
            };

            if literal.size > self.limits.max_literal_size {
                let tag = leading_tag(buf);
                return Err(if literal.synchronizing {
                    DecodeError::LiteralRejected {
                        tag,
                        size: literal.size,
                        consumed: line_end,
                    }
                } else {
                    DecodeError::LiteralTooLarge {
                        tag,
                        size: literal.size,
                    }
                });
            }

            if literal.synchronizing && self.cursor.announced != Some(line_end) {
                self.cursor.announced = Some(line_end);
                self.transmits
                    .push_back(Transmit::from_static(LITERAL_CONTINUATION.as_bytes()));
            }
            self.cursor.literal_end = Some(line_end + literal.size);
        }
    }
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Length of an unterminated line, not counting a trailing CR.
fn pending_length(line: &[u8]) -> usize {
    line.len() - usize::from(line.ends_with(b"\r"))
}

/// Parses a `{n}` or `{n+}` suffix at the end of a line (CRLF excluded).
fn literal_header(line: &[u8]) -> Option<LiteralHeader> {
    let inner = line.strip_suffix(b"}")?;
    let open = inner.iter().rposition(|&b| b == b'{')?;
    let mut digits = &inner[open + 1..];
    let synchronizing = match digits.strip_suffix(b"+") {
        Some(d) => {
            digits = d;
            false
        }
        None => true,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let size = std::str::from_utf8(digits).ok()?.parse().ok()?;
    Some(LiteralHeader {
        size,
        synchronizing,
    })
}

/// Best-effort tag extraction for error responses.
fn leading_tag(buf: &[u8]) -> Option<Tag> {
    let end = buf.iter().position(|&b| !is_tag_char(b))?;
    if buf[end] != b' ' {
        return None;
    }
    std::str::from_utf8(&buf[..end]).ok().and_then(Tag::new)
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
    use proptest::prelude::*;

    use super::*;
    use crate::command::CommandBody;
    use crate::types::Mailbox;

    fn decoder() -> IncrementalDecoder {
        IncrementalDecoder::new(DecoderLimits {
            max_line_length: 1024,
            max_literal_size: 4096,
        })
    }

    fn complete(decoded: Decoded<Command>) -> (Command, usize) {
        match decoded {
            Decoded::Complete { value, consumed } => (value, consumed),
            Decoded::Incomplete(needed) => panic!("incomplete: {needed:?}"),
        }
    }

    fn drain_transmits(dec: &mut IncrementalDecoder) -> Vec<Transmit> {
        std::iter::from_fn(|| dec.poll_transmit()).collect()
    }

    #[test]
    fn test_simple_command() {
        let mut dec = decoder();
        let (cmd, consumed) = complete(dec.decode(b"a1 NOOP\r\n").unwrap());
        assert_eq!(cmd.body, CommandBody::Noop);
        assert_eq!(consumed, 9);
        assert!(dec.poll_transmit().is_none());
    }

    #[test]
    fn test_pipelined_commands_are_decoded_one_at_a_time() {
        let mut dec = decoder();
        let buf = b"a1 NOOP\r\na2 CAPABILITY\r\n";
        let (first, consumed) = complete(dec.decode(buf).unwrap());
        assert_eq!(first.tag.as_str(), "a1");
        let (second, rest) = complete(dec.decode(&buf[consumed..]).unwrap());
        assert_eq!(second.body, CommandBody::Capability);
        assert_eq!(consumed + rest, buf.len());
    }

    #[test]
    fn test_partial_line_is_incomplete() {
        let mut dec = decoder();
        assert_eq!(
            dec.decode(b"a1 NO").unwrap(),
            Decoded::Incomplete(Needed::Unknown)
        );
        assert_eq!(
            dec.decode(b"a1 NOOP\r").unwrap(),
            Decoded::Incomplete(Needed::Unknown)
        );
        let (cmd, _) = complete(dec.decode(b"a1 NOOP\r\n").unwrap());
        assert_eq!(cmd.body, CommandBody::Noop);
    }

    #[test]
    fn test_sync_literal_requests_continuation_once() {
        let mut dec = decoder();
        let header = b"a1 LOGIN {4}\r\n".to_vec();
        assert_eq!(
            dec.decode(&header).unwrap(),
            Decoded::Incomplete(Needed::Size(NonZeroUsize::new(4).unwrap()))
        );
        assert_eq!(drain_transmits(&mut dec).len(), 1);

        let mut buf = header.clone();
        buf.extend_from_slice(b"jo");
        assert_eq!(
            dec.decode(&buf).unwrap(),
            Decoded::Incomplete(Needed::Size(NonZeroUsize::new(2).unwrap()))
        );
        assert!(dec.poll_transmit().is_none());

        buf.extend_from_slice(b"hn pw\r\n");
        let (cmd, consumed) = complete(dec.decode(&buf).unwrap());
        assert_eq!(consumed, buf.len());
        assert_eq!(
            cmd.body,
            CommandBody::Login {
                username: "john".into(),
                password: "pw".into(),
            }
        );
        assert!(dec.poll_transmit().is_none());
    }

    #[test]
    fn test_non_sync_literal_sends_no_continuation() {
        let mut dec = decoder();
        let (cmd, _) = complete(dec.decode(b"a1 LOGIN {4+}\r\njohn pw\r\n").unwrap());
        assert!(matches!(cmd.body, CommandBody::Login { .. }));
        assert!(dec.poll_transmit().is_none());
    }

    #[test]
    fn test_literal_data_is_not_split_on_crlf() {
        let mut dec = decoder();
        let buf = b"a1 APPEND INBOX {13}\r\na2 LOGOUT\r\n\r\n\r\n";
        let (cmd, consumed) = complete(dec.decode(buf).unwrap());
        assert_eq!(consumed, buf.len());
        let CommandBody::Append { message, .. } = cmd.body else {
            panic!("expected APPEND");
        };
        assert_eq!(&message[..], b"a2 LOGOUT\r\n\r\n");
    }

    #[test]
    fn test_line_too_long_is_fatal_with_tag() {
        let mut dec = IncrementalDecoder::new(DecoderLimits {
            max_line_length: 16,
            max_literal_size: 16,
        });
        let err = dec.decode(b"t1 SELECT aaaaaaaaaaaaaaaa").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.tag().unwrap().as_str(), "t1");
    }

    #[test]
    fn test_oversized_sync_literal_is_rejected_without_continuation() {
        let mut dec = IncrementalDecoder::new(DecoderLimits {
            max_line_length: 64,
            max_literal_size: 8,
        });
        let err = dec.decode(b"t1 APPEND INBOX {100}\r\n").unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.consumed(), Some(23));
        assert_eq!(err.tag().unwrap().as_str(), "t1");
        assert!(dec.poll_transmit().is_none());
    }

    #[test]
    fn test_oversized_non_sync_literal_is_fatal() {
        let mut dec = IncrementalDecoder::new(DecoderLimits {
            max_line_length: 64,
            max_literal_size: 8,
        });
        let err = dec.decode(b"t1 APPEND INBOX {100+}\r\n").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_syntax_error_reports_frame_length() {
        let mut dec = decoder();
        let buf = b"t1 FETCH x FLAGS\r\nt2 NOOP\r\n";
        let err = dec.decode(buf).unwrap_err();
        assert_eq!(err.consumed(), Some(18));
        assert_eq!(err.tag().unwrap().as_str(), "t1");
        let (cmd, _) = complete(dec.decode(&buf[18..]).unwrap());
        assert_eq!(cmd.tag.as_str(), "t2");
    }

    #[test]
    fn test_shrunken_buffer_resets_cursor() {
        let mut dec = decoder();
        assert!(matches!(
            dec.decode(b"a1 LOGIN {4}\r\njo").unwrap(),
            Decoded::Incomplete(Needed::Size(_))
        ));
        // caller replaced its buffer; stale literal progress must not apply
        let (cmd, _) = complete(dec.decode(b"b1 NOOP\r\n").unwrap());
        assert_eq!(cmd.tag.as_str(), "b1");
    }

    #[test]
    fn test_decode_line() {
        let mut dec = decoder();
        assert_eq!(
            dec.decode_line(b"DO").unwrap(),
            Decoded::Incomplete(Needed::Unknown)
        );
        assert_eq!(
            dec.decode_line(b"DONE\r\nx").unwrap(),
            Decoded::Complete {
                value: b"DONE".to_vec(),
                consumed: 6
            }
        );
    }

    #[test]
    fn test_literal_header_forms() {
        assert_eq!(literal_header(b"a {12}").unwrap().size, 12);
        assert!(literal_header(b"a {12}").unwrap().synchronizing);
        assert!(!literal_header(b"a {12+}").unwrap().synchronizing);
        assert!(literal_header(b"a {}").is_none());
        assert!(literal_header(b"a {x}").is_none());
        assert!(literal_header(b"a NOOP").is_none());
    }

    fn feed_in_chunks(input: &[u8], chunks: &[usize]) -> (Command, usize, usize) {
        let mut dec = decoder();
        let mut buf = Vec::new();
        let mut offset = 0;
        for &size in chunks.iter().cycle() {
            let end = (offset + size).min(input.len());
            buf.extend_from_slice(&input[offset..end]);
            offset = end;
            match dec.decode(&buf).unwrap() {
                Decoded::Complete { value, consumed } => {
                    assert_eq!(offset, input.len(), "completed before all bytes arrived");
                    let continuations = drain_transmits(&mut dec).len();
                    return (value, consumed, continuations);
                }
                Decoded::Incomplete(_) => assert!(offset < input.len()),
            }
        }
        unreachable!("chunk sizes are non-zero")
    }

    proptest! {
        #[test]
        fn chunked_decode_matches_whole_decode(
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            chunks in proptest::collection::vec(1usize..16, 1..8),
        ) {
            let mut input =
                format!("a1 APPEND INBOX (\\Seen) {{{}}}\r\n", payload.len()).into_bytes();
            input.extend_from_slice(&payload);
            input.extend_from_slice(b"\r\n");

            let mut whole = decoder();
            let (expected, whole_consumed) = complete(whole.decode(&input).unwrap());
            prop_assert_eq!(whole_consumed, input.len());
            prop_assert_eq!(drain_transmits(&mut whole).len(), 1);

            let (value, consumed, continuations) = feed_in_chunks(&input, &chunks);
            prop_assert_eq!(value, expected);
            prop_assert_eq!(consumed, input.len());
            prop_assert_eq!(continuations, 1);
        }

        #[test]
        fn line_at_the_limit_survives_any_split(
            name in "[a-h]{1,24}",
            slack in 0usize..3,
        ) {
            let input = format!("a1 SELECT {name}\r\n").into_bytes();
            let limits = DecoderLimits {
                max_line_length: input.len() - 2 + slack,
                max_literal_size: 16,
            };

            let mut dec = IncrementalDecoder::new(limits);
            for end in 1..input.len() {
                let partial = dec.decode(&input[..end]);
                prop_assert!(matches!(partial, Ok(Decoded::Incomplete(_))), "{:?}", partial);
            }
            let (cmd, consumed) = complete(dec.decode(&input).unwrap());
            prop_assert_eq!(consumed, input.len());
            let expected = CommandBody::Select { mailbox: Mailbox::new(name.as_str()) };
            prop_assert_eq!(cmd.body, expected);

            let mut lines = IncrementalDecoder::new(limits);
            let raw = &input[3..];
            for end in 1..raw.len() {
                let partial = lines.decode_line(&raw[..end]);
                prop_assert!(matches!(partial, Ok(Decoded::Incomplete(_))), "{:?}", partial);
            }
            let Ok(Decoded::Complete { value, consumed }) = lines.decode_line(raw) else {
                panic!("line not framed");
            };
            prop_assert_eq!(&value[..], &raw[..raw.len() - 2]);
            prop_assert_eq!(consumed, raw.len());
        }

        #[test]
        fn literal_bytes_are_opaque(
            before in "[a-z]{0,8}",
            after in "[a-z]{0,8}",
        ) {
            // a literal whose content looks like a complete command line
            let content = format!("{before}\r\nz9 LOGOUT\r\n{after}");
            let input = format!("a1 LOGIN {{{}+}}\r\n{content} pw\r\n", content.len());
            let mut dec = decoder();
            let (cmd, consumed) = complete(dec.decode(input.as_bytes()).unwrap());
            prop_assert_eq!(consumed, input.len());
            prop_assert_eq!(
                cmd.body,
                CommandBody::Login { username: content, password: "pw".into() }
            );
        }
    }
}
