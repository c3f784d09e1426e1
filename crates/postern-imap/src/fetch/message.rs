//! RFC 5322 header access for FETCH sections and SEARCH.

use thiserror::Error;

/// A header block that cannot be split into fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed header line {line}")]
pub struct MalformedHeader {
    /// 1-based line number of the offending line.
    pub line: usize,
}

/// One header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField<'a> {
    /// Field name as written.
    pub name: &'a str,
    /// Value with folding removed and surrounding whitespace trimmed.
    pub value: String,
    /// The raw field, continuation lines and CRLF included.
    pub raw: &'a [u8],
}

/// Splits a message into its header section, including the empty line
/// that ends it, and its body.
#[must_use]
pub fn split_message(content: &[u8]) -> (&[u8], &[u8]) {
    if content.starts_with(b"\r\n") {
        return content.split_at(2);
    }
    content
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map_or((content, &[][..]), |pos| content.split_at(pos + 4))
}

/// Parses the fields of a header section.
///
/// # Errors
///
/// Returns [`MalformedHeader`] for a line that is neither a field nor a
/// continuation of one.
pub fn parse_fields(header: &[u8]) -> Result<Vec<HeaderField<'_>>, MalformedHeader> {
    let mut fields: Vec<HeaderField<'_>> = Vec::new();
    let mut field_start = 0;
    let mut offset = 0;
    for (index, line) in header.split_inclusive(|&b| b == b'\n').enumerate() {
        let start = offset;
        offset += line.len();
        let text = trim_eol(line);
        if text.is_empty() {
            break;
        }
        let malformed = MalformedHeader { line: index + 1 };
        if matches!(text[0], b' ' | b'\t') {
            let field = fields.last_mut().ok_or(malformed)?;
            field.value.push(' ');
            field.value.push_str(String::from_utf8_lossy(text).trim());
            field.raw = &header[field_start..offset];
            continue;
        }
        let colon = text
            .iter()
            .position(|&b| b == b':')
            .filter(|&p| p > 0 && text[..p].iter().all(u8::is_ascii_graphic))
            .ok_or_else(|| malformed.clone())?;
        let name = std::str::from_utf8(&text[..colon]).map_err(|_| malformed)?;
        field_start = start;
        fields.push(HeaderField {
            name,
            value: String::from_utf8_lossy(&text[colon + 1..]).trim().to_string(),
            raw: &header[start..offset],
        });
    }
    Ok(fields)
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Returns the first value of the named field, compared case-insensitively.
#[must_use]
pub fn field_value<'a>(fields: &'a [HeaderField<'_>], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
        .map(|f| f.value.as_str())
}

/// Builds a header block holding only the fields that match (or, with
/// `exclude`, do not match) `names`, terminated by an empty line.
#[must_use]
pub fn select_fields(fields: &[HeaderField<'_>], names: &[String], exclude: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        let listed = names.iter().any(|n| n.eq_ignore_ascii_case(field.name));
        if listed != exclude {
            out.extend_from_slice(field.raw);
            if !field.raw.ends_with(b"\n") {
                out.extend_from_slice(b"\r\n");
            }
        }
    }
    out.extend_from_slice(b"\r\n");
    out
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

    const MESSAGE: &[u8] = b"From: Alice <alice@example.com>\r\n\
Subject: quarterly\r\n  report\r\n\
To: bob@example.com\r\n\
\r\n\
Body text\r\n";

    #[test]
    fn split_at_blank_line() {
        let (header, body) = split_message(MESSAGE);
        assert!(header.ends_with(b"\r\n\r\n"));
        assert_eq!(body, b"Body text\r\n");
    }

    #[test]
    fn message_without_body() {
        let (header, body) = split_message(b"Subject: x\r\n");
        assert_eq!(header, b"Subject: x\r\n");
        assert!(body.is_empty());
    }

    #[test]
    fn folded_values_are_unfolded() {
        let (header, _) = split_message(MESSAGE);
        let fields = parse_fields(header).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(field_value(&fields, "subject"), Some("quarterly report"));
        assert_eq!(fields[1].raw, b"Subject: quarterly\r\n  report\r\n");
    }

    #[test]
    fn garbage_line_is_malformed() {
        let err = parse_fields(b"From: a@b\r\nnot a header\r\n\r\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(parse_fields(b"  leading continuation\r\n").is_err());
    }

    #[test]
    fn header_fields_selection() {
        let (header, _) = split_message(MESSAGE);
        let fields = parse_fields(header).unwrap();
        let only = select_fields(&fields, &["TO".to_string()], false);
        assert_eq!(only, b"To: bob@example.com\r\n\r\n");
        let not = select_fields(&fields, &["subject".to_string(), "to".to_string()], true);
        assert_eq!(not, b"From: Alice <alice@example.com>\r\n\r\n");
    }
}
