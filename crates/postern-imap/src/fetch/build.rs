//! Turning stored message data into `* n FETCH (...)` responses.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;

use super::envelope::{Envelope, EnvelopeError};
use super::message;
use crate::command::{FetchAttribute, FetchItems, Section};
use crate::response::encode::{write_literal, write_string};
use crate::store::MessageData;
use crate::types::{Flags, Uid, format_date_time};

/// Errors building one FETCH response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The envelope could not be built.
    #[error("envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The header section could not be parsed.
    #[error(transparent)]
    Header(#[from] message::MalformedHeader),

    /// The store returned no content for an item that needs it.
    #[error("message {0} has no content")]
    MissingContent(u32),
}

/// One data item of a FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchValue {
    /// `UID n`.
    Uid(Uid),
    /// `FLAGS (...)`.
    Flags(Flags),
    /// `INTERNALDATE "..."`.
    InternalDate(DateTime<FixedOffset>),
    /// `RFC822.SIZE n`.
    Rfc822Size(u32),
    /// `ENVELOPE (...)`.
    Envelope(Envelope),
    /// `BODY[section]<origin> literal`.
    Body {
        /// Section as requested.
        section: Section,
        /// Partial origin, echoed back when requested.
        origin: Option<u32>,
        /// Section data.
        data: Bytes,
    },
    /// `RFC822 literal`.
    Rfc822(Bytes),
    /// `RFC822.HEADER literal`.
    Rfc822Header(Bytes),
    /// `RFC822.TEXT literal`.
    Rfc822Text(Bytes),
}

impl FetchValue {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Uid(uid) => buf.extend_from_slice(format!("UID {uid}").as_bytes()),
            Self::Flags(flags) => buf.extend_from_slice(format!("FLAGS {flags}").as_bytes()),
            Self::InternalDate(date) => {
                buf.extend_from_slice(b"INTERNALDATE ");
                write_string(buf, format_date_time(date).as_bytes());
            }
            Self::Rfc822Size(size) => {
                buf.extend_from_slice(format!("RFC822.SIZE {size}").as_bytes());
            }
            Self::Envelope(envelope) => {
                buf.extend_from_slice(b"ENVELOPE ");
                envelope.encode(buf);
            }
            Self::Body {
                section,
                origin,
                data,
            } => {
                buf.extend_from_slice(format!("BODY[{section}]").as_bytes());
                if let Some(origin) = origin {
                    buf.extend_from_slice(format!("<{origin}>").as_bytes());
                }
                buf.push(b' ');
                write_literal(buf, data);
            }
            Self::Rfc822(data) => {
                buf.extend_from_slice(b"RFC822 ");
                write_literal(buf, data);
            }
            Self::Rfc822Header(data) => {
                buf.extend_from_slice(b"RFC822.HEADER ");
                write_literal(buf, data);
            }
            Self::Rfc822Text(data) => {
                buf.extend_from_slice(b"RFC822.TEXT ");
                write_literal(buf, data);
            }
        }
    }
}

/// A complete untagged FETCH response for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Message sequence number.
    pub seq: u32,
    /// Data items, in request order.
    pub items: Vec<FetchValue>,
}

impl FetchResponse {
    /// Writes `* <seq> FETCH (<items>)\r\n`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(format!("* {} FETCH (", self.seq).as_bytes());
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                buf.push(b' ');
            }
            item.encode(buf);
        }
        buf.extend_from_slice(b")\r\n");
    }
}

/// Builds [`FetchResponse`]s for a fixed set of requested items.
#[derive(Debug, Clone)]
pub struct FetchResponseBuilder {
    items: FetchItems,
    attributes: Vec<FetchAttribute>,
}

impl FetchResponseBuilder {
    /// Creates a builder. UID FETCH always reports the UID.
    #[must_use]
    pub fn new(items: &FetchItems, uid: bool) -> Self {
        let items = if uid { items.with_uid() } else { items.clone() };
        let attributes = items.attributes();
        Self { items, attributes }
    }

    /// The items the store is asked for.
    #[must_use]
    pub const fn items(&self) -> &FetchItems {
        &self.items
    }

    /// Builds the response for one message.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if the message content is missing or
    /// cannot be parsed for the requested items.
    pub fn build(&self, message: &MessageData) -> Result<FetchResponse, BuildError> {
        let content = || {
            message
                .content
                .clone()
                .ok_or(BuildError::MissingContent(message.seq))
        };

        let mut items = Vec::with_capacity(self.attributes.len());
        for attribute in &self.attributes {
            let value = match attribute {
                FetchAttribute::Uid => FetchValue::Uid(message.uid),
                FetchAttribute::Flags => FetchValue::Flags(message.flags.clone()),
                FetchAttribute::InternalDate => {
                    FetchValue::InternalDate(message.internal_date)
                }
                FetchAttribute::Rfc822Size => FetchValue::Rfc822Size(message.size),
                FetchAttribute::Envelope => {
                    FetchValue::Envelope(Envelope::from_message(&content()?)?)
                }
                FetchAttribute::Rfc822 => FetchValue::Rfc822(content()?),
                FetchAttribute::Rfc822Header => {
                    FetchValue::Rfc822Header(section_data(&content()?, &Section::Header)?)
                }
                FetchAttribute::Rfc822Text => {
                    FetchValue::Rfc822Text(section_data(&content()?, &Section::Text)?)
                }
                FetchAttribute::Body {
                    section,
                    partial,
                    ..
                } => {
                    let data = section_data(&content()?, section)?;
                    let (origin, data) = match partial {
                        Some((origin, length)) => (Some(*origin), slice(&data, *origin, *length)),
                        None => (None, data),
                    };
                    FetchValue::Body {
                        section: section.clone(),
                        origin,
                        data,
                    }
                }
            };
            items.push(value);
        }
        Ok(FetchResponse {
            seq: message.seq,
            items,
        })
    }
}

fn section_data(content: &Bytes, section: &Section) -> Result<Bytes, BuildError> {
    let (header, body) = message::split_message(content);
    Ok(match section {
        Section::Full => content.clone(),
        Section::Header => content.slice_ref(header),
        Section::Text => content.slice_ref(body),
        Section::HeaderFields(names) => {
            Bytes::from(message::select_fields(&message::parse_fields(header)?, names, false))
        }
        Section::HeaderFieldsNot(names) => {
            Bytes::from(message::select_fields(&message::parse_fields(header)?, names, true))
        }
    })
}

fn slice(data: &Bytes, origin: u32, length: u32) -> Bytes {
    let len = data.len();
    let start = usize::try_from(origin).map_or(len, |o| o.min(len));
    let end = usize::try_from(length).map_or(len, |l| start.saturating_add(l).min(len));
    data.slice(start..end)
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
    use crate::types::{Flag, parse_date_time};

    const CONTENT: &[u8] = b"Subject: hi\r\nFrom: a@example.com\r\n\r\nHello world\r\n";

    fn message(content: Option<&'static [u8]>) -> MessageData {
        MessageData {
            seq: 3,
            uid: Uid::new(42).unwrap(),
            flags: Flags::from_vec(vec![Flag::Seen]),
            internal_date: parse_date_time("17-Jul-1996 02:44:25 -0700").unwrap(),
            size: u32::try_from(CONTENT.len()).unwrap(),
            content: content.map(Bytes::from_static),
        }
    }

    fn encoded(response: &FetchResponse) -> String {
        let mut buf = Vec::new();
        response.encode(&mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn fast_items_need_no_content() {
        let builder = FetchResponseBuilder::new(&FetchItems::Fast, false);
        let response = builder.build(&message(None)).unwrap();
        assert_eq!(
            encoded(&response),
            "* 3 FETCH (FLAGS (\\Seen) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" \
             RFC822.SIZE 49)\r\n"
        );
    }

    #[test]
    fn uid_fetch_leads_with_uid() {
        let items = FetchItems::Items(vec![FetchAttribute::Flags]);
        let builder = FetchResponseBuilder::new(&items, true);
        let response = builder.build(&message(None)).unwrap();
        assert_eq!(response.items[0], FetchValue::Uid(Uid::new(42).unwrap()));
        assert_eq!(encoded(&response), "* 3 FETCH (UID 42 FLAGS (\\Seen))\r\n");
    }

    #[test]
    fn body_sections_and_partial() {
        let items = FetchItems::Items(vec![
            FetchAttribute::Body {
                section: Section::Text,
                peek: true,
                partial: Some((0, 5)),
            },
            FetchAttribute::Body {
                section: Section::HeaderFields(vec!["SUBJECT".into()]),
                peek: false,
                partial: None,
            },
        ]);
        let builder = FetchResponseBuilder::new(&items, false);
        let response = builder.build(&message(Some(CONTENT))).unwrap();
        assert_eq!(
            encoded(&response),
            "* 3 FETCH (BODY[TEXT]<0> {5}\r\nHello \
             BODY[HEADER.FIELDS (SUBJECT)] {15}\r\nSubject: hi\r\n\r\n)\r\n"
        );
    }

    #[test]
    fn partial_past_the_end_is_empty() {
        let data = Bytes::from_static(b"abc");
        assert_eq!(slice(&data, 10, 5), Bytes::new());
        assert_eq!(slice(&data, 1, 100), Bytes::from_static(b"bc"));
    }

    #[test]
    fn missing_content_is_an_error() {
        let builder = FetchResponseBuilder::new(&FetchItems::All, false);
        assert_eq!(
            builder.build(&message(None)).unwrap_err(),
            BuildError::MissingContent(3)
        );
    }

    #[test]
    fn rfc822_items() {
        let items =
            FetchItems::Items(vec![FetchAttribute::Rfc822Header, FetchAttribute::Rfc822Size]);
        let builder = FetchResponseBuilder::new(&items, false);
        let response = builder.build(&message(Some(CONTENT))).unwrap();
        assert!(encoded(&response).starts_with("* 3 FETCH (RFC822.HEADER {36}\r\nSubject: hi\r\n"));
    }
}
