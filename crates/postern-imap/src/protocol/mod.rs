//! Sans-I/O session layer.
//!
//! Everything here is plain state manipulated by the connection task:
//!
//! - [`Session`]: connection state, the selected mailbox and attributes
//! - [`ContinuationRouter`]: the stack of handlers that own the input
//!   stream during AUTHENTICATE and IDLE
//! - [`Transmit`]: bytes the decoder asks the connection to send
//!
//! None of it performs I/O, so the whole layer can be driven from tests
//! with a [`RecordingWriter`](crate::response::RecordingWriter).

mod handlers;
mod router;
mod session;
mod state;
mod transmit;

pub use handlers::{IdleHandler, LoginPasswordHandler, LoginUserHandler, PlainAuthHandler};
pub use router::{ContinuationRouter, LineAction, LineHandler, LineStep};
pub use session::{AUTH_FAILURES, Attributes, SelectedMailbox, Session};
pub use state::SessionState;
pub use transmit::Transmit;
