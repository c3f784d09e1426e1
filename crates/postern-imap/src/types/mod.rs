//! Core IMAP types.
//!
//! The vocabulary shared by the decoder, the session and the response
//! writer, following RFC 3501 (`IMAP4rev1`).

#![allow(clippy::missing_const_for_fn)]

mod capability;
mod date;
mod flags;
mod identifiers;
mod mailbox;
mod response_code;
mod sequence;

pub use capability::{Capability, Status, format_capabilities};
pub use date::{format_date_time, parse_date, parse_date_time};
pub use flags::{Flag, Flags};
pub use identifiers::{Tag, Uid, UidValidity, is_tag_char};
pub use mailbox::{ListEntry, Mailbox, MailboxAttribute, MailboxStatus};
pub use response_code::ResponseCode;
pub use sequence::{SeqBound, SeqRange, SequenceSet};
