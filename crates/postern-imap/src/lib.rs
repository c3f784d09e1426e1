//! # postern-imap
//!
//! The session protocol engine of an IMAP4rev1 server (RFC 3501).
//!
//! The crate turns a raw byte stream into commands, tracks the per-connection
//! session, upgrades the transport in place for STARTTLS and COMPRESS, and
//! streams large FETCH results in bounded batches. Mail storage and
//! credential checks are supplied by the embedder through the
//! [`MailboxStore`] and [`Authenticator`] traits.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use postern_imap::{Config, MemoryStore, Server};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> postern_imap::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.add_user("alice", "secret");
//!     store.create_mailbox("INBOX");
//!
//!     let listener = TcpListener::bind("127.0.0.1:1143").await?;
//!     let server = Server::new(Arc::clone(&store), store, Config::new());
//!     server.serve(listener).await
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! ┌─────────────────────┐
//! │  NotAuthenticated   │ ─── LOGIN / AUTHENTICATE ───→ Authenticated
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    Authenticated    │ ─── SELECT / EXAMINE ───→ Selected
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │      Selected       │ ─── CLOSE / UNSELECT ───→ Authenticated
//! └─────────────────────┘
//! ```
//!
//! Every state moves to `LoggedOut` on LOGOUT or when the connection ends.
//!
//! ## Modules
//!
//! - [`parser`]: incremental, literal-aware command decoder
//! - [`protocol`]: session state and continuation line handlers
//! - [`dispatch`]: command handlers
//! - [`transport`]: codec pipeline with TLS and DEFLATE stages
//! - [`fetch`]: batched FETCH result production
//! - [`store`]: storage traits and an in-memory implementation
//! - [`connection`]: per-connection driver and accept loop

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod config;
pub mod connection;
pub mod dispatch;
mod error;
pub mod fetch;
pub mod parser;
pub mod protocol;
pub mod response;
pub mod sasl;
pub mod store;
pub mod transport;
pub mod types;

pub use command::{Command, CommandBody, FetchAttribute, FetchItems, SearchCriteria};
pub use config::{Config, ConfigBuilder};
pub use connection::{Connection, Server};
pub use dispatch::{CommandDispatcher, Context, Outcome};
pub use error::{Error, Result};
pub use fetch::{Batches, ChunkedResultProducer, ResultBatch};
pub use parser::{DecodeError, Decoded, IncrementalDecoder, Needed};
pub use protocol::{ContinuationRouter, LineHandler, Session, SessionState};
pub use response::{RecordingWriter, ResponseWriter};
pub use store::{Authenticator, MailboxStore, MemoryStore, StoreError};
pub use transport::{Pipeline, PipelineUpgrade, TransportPipeline};
pub use types::{
    Capability, Flag, Flags, Mailbox, MailboxStatus, ResponseCode, SequenceSet, Status, Tag, Uid,
    UidValidity,
};

/// IMAP protocol revision implemented by the server.
pub const IMAP_VERSION: &str = "IMAP4rev1";
