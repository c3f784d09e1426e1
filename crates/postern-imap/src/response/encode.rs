//! Response serialization helpers.

use crate::types::{ResponseCode, Status, Tag};

/// Writes `<tag> <status> [code] <text>\r\n`.
pub fn write_tagged(
    buf: &mut Vec<u8>,
    tag: &Tag,
    status: Status,
    code: Option<&ResponseCode>,
    text: &str,
) {
    buf.extend_from_slice(tag.as_str().as_bytes());
    write_status_tail(buf, status, code, text);
}

/// Writes `* <status> [code] <text>\r\n`.
pub fn write_untagged_status(
    buf: &mut Vec<u8>,
    status: Status,
    code: Option<&ResponseCode>,
    text: &str,
) {
    buf.push(b'*');
    write_status_tail(buf, status, code, text);
}

fn write_status_tail(buf: &mut Vec<u8>, status: Status, code: Option<&ResponseCode>, text: &str) {
    buf.push(b' ');
    buf.extend_from_slice(status.as_str().as_bytes());
    if let Some(code) = code {
        buf.extend_from_slice(format!(" [{code}]").as_bytes());
    }
    buf.push(b' ');
    write_text(buf, text);
    buf.extend_from_slice(b"\r\n");
}

/// Writes `* <text>\r\n`.
pub fn write_untagged(buf: &mut Vec<u8>, text: &str) {
    buf.extend_from_slice(b"* ");
    write_text(buf, text);
    buf.extend_from_slice(b"\r\n");
}

/// Writes `+ <text>\r\n`.
pub fn write_continuation(buf: &mut Vec<u8>, text: &str) {
    buf.extend_from_slice(b"+ ");
    write_text(buf, text);
    buf.extend_from_slice(b"\r\n");
}

/// Writes `{n}\r\n` followed by the data.
pub fn write_literal(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(format!("{{{}}}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
}

/// Writes human-readable text, replacing CR and LF so a response line
/// cannot be split by client-influenced content.
fn write_text(buf: &mut Vec<u8>, text: &str) {
    buf.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
}

/// Writes an astring (atom or quoted string, literal if needed).
pub fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        write_string(buf, s.as_bytes());
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

/// Writes a string as quoted when possible, otherwise as a literal.
pub fn write_string(buf: &mut Vec<u8>, data: &[u8]) {
    if data.iter().all(|&b| (0x20..0x7f).contains(&b)) {
        buf.push(b'"');
        for &b in data {
            if b == b'"' || b == b'\\' {
                buf.push(b'\\');
            }
            buf.push(b);
        }
        buf.push(b'"');
    } else {
        write_literal(buf, data);
    }
}

/// Writes an nstring: `NIL` or a string.
pub fn write_nstring(buf: &mut Vec<u8>, data: Option<&[u8]>) {
    match data {
        Some(data) => write_string(buf, data),
        None => buf.extend_from_slice(b"NIL"),
    }
}

/// Returns true if the byte cannot appear in an atom.
const fn needs_quoting(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*' | b']'
    ) || b < 0x20
        || b >= 0x7F
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

    fn encoded(f: impl FnOnce(&mut Vec<u8>)) -> String {
        let mut buf = Vec::new();
        f(&mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn tagged_with_and_without_code() {
        let tag = Tag::new("a1").unwrap();
        assert_eq!(
            encoded(|b| write_tagged(b, &tag, Status::Ok, None, "NOOP completed")),
            "a1 OK NOOP completed\r\n"
        );
        assert_eq!(
            encoded(|b| write_tagged(
                b,
                &tag,
                Status::Ok,
                Some(&ResponseCode::ReadWrite),
                "SELECT completed"
            )),
            "a1 OK [READ-WRITE] SELECT completed\r\n"
        );
    }

    #[test]
    fn text_cannot_inject_lines() {
        assert_eq!(
            encoded(|b| write_untagged(b, "BYE\r\n* OK evil")),
            "* BYE  * OK evil\r\n"
        );
    }

    #[test]
    fn astring_forms() {
        assert_eq!(encoded(|b| write_astring(b, "INBOX")), "INBOX");
        assert_eq!(encoded(|b| write_astring(b, "")), "\"\"");
        assert_eq!(encoded(|b| write_astring(b, "My \"Box\"")), "\"My \\\"Box\\\"\"");
    }

    #[test]
    fn eight_bit_strings_become_literals() {
        let mut buf = Vec::new();
        write_string(&mut buf, "Grüße".as_bytes());
        assert!(buf.starts_with(b"{7}\r\n"));
        assert_eq!(encoded(|b| write_nstring(b, None)), "NIL");
    }
}
