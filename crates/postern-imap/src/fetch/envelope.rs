//! ENVELOPE construction from message headers.

use thiserror::Error;

use super::message::{self, HeaderField, MalformedHeader};
use crate::response::encode::{write_nstring, write_string};

/// Errors building an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The header section could not be parsed.
    #[error(transparent)]
    Header(#[from] MalformedHeader),

    /// An address header could not be parsed.
    #[error("unparseable address in {field}: {value}")]
    Address {
        /// Header field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

/// One address in an envelope address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Display name.
    pub name: Option<String>,
    /// Local part.
    pub mailbox: String,
    /// Domain.
    pub host: Option<String>,
}

/// The RFC 3501 envelope structure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Date header.
    pub date: Option<String>,
    /// Subject header.
    pub subject: Option<String>,
    /// From addresses.
    pub from: Vec<Address>,
    /// Sender addresses, defaulting to From.
    pub sender: Vec<Address>,
    /// Reply-To addresses, defaulting to From.
    pub reply_to: Vec<Address>,
    /// To addresses.
    pub to: Vec<Address>,
    /// Cc addresses.
    pub cc: Vec<Address>,
    /// Bcc addresses.
    pub bcc: Vec<Address>,
    /// In-Reply-To header.
    pub in_reply_to: Option<String>,
    /// Message-ID header.
    pub message_id: Option<String>,
}

impl Envelope {
    /// Builds the envelope of a raw message.
    ///
    /// # Errors
    ///
    /// Returns an error if the header section or an address field is
    /// malformed.
    pub fn from_message(content: &[u8]) -> Result<Self, EnvelopeError> {
        let (header, _) = message::split_message(content);
        let fields = message::parse_fields(header)?;
        let text = |name: &str| message::field_value(&fields, name).map(str::to_string);

        let from = addresses(&fields, "From")?;
        let mut sender = addresses(&fields, "Sender")?;
        if sender.is_empty() {
            sender.clone_from(&from);
        }
        let mut reply_to = addresses(&fields, "Reply-To")?;
        if reply_to.is_empty() {
            reply_to.clone_from(&from);
        }

        Ok(Self {
            date: text("Date"),
            subject: text("Subject"),
            from,
            sender,
            reply_to,
            to: addresses(&fields, "To")?,
            cc: addresses(&fields, "Cc")?,
            bcc: addresses(&fields, "Bcc")?,
            in_reply_to: text("In-Reply-To"),
            message_id: text("Message-ID"),
        })
    }

    /// Writes the parenthesized envelope.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'(');
        write_nstring(buf, self.date.as_deref().map(str::as_bytes));
        buf.push(b' ');
        write_nstring(buf, self.subject.as_deref().map(str::as_bytes));
        for list in [
            &self.from,
            &self.sender,
            &self.reply_to,
            &self.to,
            &self.cc,
            &self.bcc,
        ] {
            buf.push(b' ');
            encode_addresses(buf, list);
        }
        buf.push(b' ');
        write_nstring(buf, self.in_reply_to.as_deref().map(str::as_bytes));
        buf.push(b' ');
        write_nstring(buf, self.message_id.as_deref().map(str::as_bytes));
        buf.push(b')');
    }
}

fn encode_addresses(buf: &mut Vec<u8>, list: &[Address]) {
    if list.is_empty() {
        buf.extend_from_slice(b"NIL");
        return;
    }
    buf.push(b'(');
    for address in list {
        buf.push(b'(');
        write_nstring(buf, address.name.as_deref().map(str::as_bytes));
        buf.extend_from_slice(b" NIL ");
        write_string(buf, address.mailbox.as_bytes());
        buf.push(b' ');
        write_nstring(buf, address.host.as_deref().map(str::as_bytes));
        buf.push(b')');
    }
    buf.push(b')');
}

fn addresses(
    fields: &[HeaderField<'_>],
    field: &'static str,
) -> Result<Vec<Address>, EnvelopeError> {
    let Some(value) = message::field_value(fields, field) else {
        return Ok(Vec::new());
    };
    split_addresses(value)
        .into_iter()
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            parse_address(part.trim()).ok_or_else(|| EnvelopeError::Address {
                field,
                value: value.to_string(),
            })
        })
        .collect()
}

/// Splits an address list on commas outside quotes and angle brackets.
fn split_addresses(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut angle = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '<' if !quoted => angle = true,
            '>' if !quoted => angle = false,
            ',' if !quoted && !angle => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

/// Parses `Name <local@host>`, `<local@host>` or `local@host`.
fn parse_address(part: &str) -> Option<Address> {
    let (name, spec) = match part.rfind('<') {
        Some(open) => {
            let close = part[open..].find('>')? + open;
            let name = part[..open].trim().trim_matches('"').trim();
            let name = (!name.is_empty()).then(|| name.to_string());
            (name, &part[open + 1..close])
        }
        None => (None, part),
    };
    let spec = spec.trim();
    if spec.is_empty() || spec.contains(char::is_whitespace) {
        return None;
    }
    let (mailbox, host) = match spec.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            (local.to_string(), Some(domain.to_string()))
        }
        Some(_) => return None,
        None => (spec.to_string(), None),
    };
    Some(Address {
        name,
        mailbox,
        host,
    })
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

    fn encoded(envelope: &Envelope) -> String {
        let mut buf = Vec::new();
        envelope.encode(&mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn builds_envelope_with_defaults() {
        let message = b"Date: Mon, 7 Feb 1994 21:52:25 -0800\r\n\
From: \"Fred Foobar\" <foobar@example.com>\r\n\
Subject: afternoon meeting\r\n\
To: mooch@example.org, Joe <joe@example.org>\r\n\
Message-ID: <B27397-0100000@example.com>\r\n\
\r\n\
Hello\r\n";
        let envelope = Envelope::from_message(message).unwrap();
        assert_eq!(envelope.from.len(), 1);
        assert_eq!(envelope.sender, envelope.from);
        assert_eq!(envelope.reply_to, envelope.from);
        assert_eq!(envelope.to.len(), 2);
        assert_eq!(envelope.to[1].name.as_deref(), Some("Joe"));

        assert_eq!(
            encoded(&envelope),
            "(\"Mon, 7 Feb 1994 21:52:25 -0800\" \"afternoon meeting\" \
((\"Fred Foobar\" NIL \"foobar\" \"example.com\")) \
((\"Fred Foobar\" NIL \"foobar\" \"example.com\")) \
((\"Fred Foobar\" NIL \"foobar\" \"example.com\")) \
((NIL NIL \"mooch\" \"example.org\")(\"Joe\" NIL \"joe\" \"example.org\")) \
NIL NIL NIL \"<B27397-0100000@example.com>\")"
        );
    }

    #[test]
    fn empty_envelope_is_all_nil() {
        let envelope = Envelope::from_message(b"\r\nbody only\r\n").unwrap();
        assert_eq!(encoded(&envelope), "(NIL NIL NIL NIL NIL NIL NIL NIL NIL NIL)");
    }

    #[test]
    fn comma_inside_quotes_is_not_a_separator() {
        let parts = split_addresses("\"Doe, Jane\" <jane@example.com>, bob@example.com");
        assert_eq!(parts.len(), 2);
        let jane = parse_address(parts[0].trim()).unwrap();
        assert_eq!(jane.name.as_deref(), Some("Doe, Jane"));
    }

    #[test]
    fn malformed_inputs_are_errors() {
        assert!(matches!(
            Envelope::from_message(b"From: <broken\r\n\r\n"),
            Err(EnvelopeError::Address { field: "From", .. })
        ));
        assert!(matches!(
            Envelope::from_message(b"this is not a header\r\n\r\n"),
            Err(EnvelopeError::Header(_))
        ));
    }
}
