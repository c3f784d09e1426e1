//! IMAP command parser.
//!
//! This module turns the client byte stream into [`Command`](crate::command::Command)
//! values without performing any I/O.
//!
//! # Architecture
//!
//! - **Decoder**: frames complete commands out of a growing buffer,
//!   including literals, and requests literal continuations
//! - **Lexer**: reads the primitive productions of one framed command
//! - **Command parser**: builds the typed command from the lexer
//!
//! # Example
//!
//! ```
//! use postern_imap::parser::{Decoded, DecoderLimits, IncrementalDecoder};
//! use postern_imap::command::CommandBody;
//!
//! let mut decoder = IncrementalDecoder::new(DecoderLimits {
//!     max_line_length: 8192,
//!     max_literal_size: 1 << 20,
//! });
//!
//! assert!(matches!(decoder.decode(b"a1 NO").unwrap(), Decoded::Incomplete(_)));
//!
//! match decoder.decode(b"a1 NOOP\r\n").unwrap() {
//!     Decoded::Complete { value, consumed } => {
//!         assert_eq!(value.body, CommandBody::Noop);
//!         assert_eq!(consumed, 9);
//!     }
//!     Decoded::Incomplete(_) => panic!("expected a command"),
//! }
//! ```

mod command;
mod decoder;
mod error;
pub mod lexer;

pub use command::parse_command;
pub use decoder::{Decoded, DecoderLimits, IncrementalDecoder, LITERAL_CONTINUATION, Needed};
pub use error::{DecodeError, ParseError};
pub use lexer::Lexer;
